//! Signal types exchanged between ports
//!
//! Signals form a subtype hierarchy: a callback registered for a kind also
//! matches every kind derived from it (`InputSet` is a `Modified`, so a
//! `Modified` callback fires for `InputSet` too). The hierarchy is encoded
//! in [`SignalKind::parent`] and matching is an ancestor-chain walk.

use crate::runtime::data::SharedData;

/// A signal travelling through the fabric.
///
/// Forward signals flow from outputs to connected inputs, backward signals
/// from inputs to their assigned output. Structural signals are emitted on a
/// port's internal sender when its assignment changes.
#[derive(Clone, Debug)]
pub enum Signal {
    /// Forward. Upstream state changed; downstream values may be stale.
    Modified,
    /// Backward. Asks the producer to bring its value up to date.
    Update,
    /// Structural. The input was assigned an output. Carries the value
    /// seeded from the output, if it had one.
    InputSet(Option<SharedData>),
    /// Structural. The input was assigned a direct data pointer.
    InputSetToSharedPtr(SharedData),
    /// Structural. The input was unset. Carries the previous value, if any.
    InputUnset(Option<SharedData>),
    /// Structural. A multi-input acquired a new input. Carries the new
    /// input's value, if it had one.
    InputAdded(Option<SharedData>),
    /// Structural. A multi-input dropped all of its inputs.
    InputsCleared,
    /// Forward. The output replaced its data pointer.
    OutputPointerSet(SharedData),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Modified => SignalKind::Modified,
            Signal::Update => SignalKind::Update,
            Signal::InputSet(_) => SignalKind::InputSet,
            Signal::InputSetToSharedPtr(_) => SignalKind::InputSetToSharedPtr,
            Signal::InputUnset(_) => SignalKind::InputUnset,
            Signal::InputAdded(_) => SignalKind::InputAdded,
            Signal::InputsCleared => SignalKind::InputsCleared,
            Signal::OutputPointerSet(_) => SignalKind::OutputPointerSet,
        }
    }
}

/// Static type of a signal, with the subtype chain used for dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Root of the hierarchy; matches every signal.
    Any,
    Modified,
    Update,
    InputSet,
    InputSetToSharedPtr,
    InputUnset,
    InputAdded,
    InputsCleared,
    OutputPointerSet,
}

impl SignalKind {
    /// The immediate base of this kind, or `None` for the root.
    ///
    /// `OutputPointerSet` is deliberately not derived from `Modified`: a
    /// replaced pointer refreshes connected inputs silently, and downstream
    /// recomputation waits for an explicit `Modified`.
    pub fn parent(self) -> Option<SignalKind> {
        match self {
            SignalKind::Any => None,
            SignalKind::InputSet => Some(SignalKind::Modified),
            SignalKind::InputSetToSharedPtr => Some(SignalKind::InputSet),
            SignalKind::Modified
            | SignalKind::Update
            | SignalKind::InputUnset
            | SignalKind::InputAdded
            | SignalKind::InputsCleared
            | SignalKind::OutputPointerSet => Some(SignalKind::Any),
        }
    }

    /// Number of subtype steps from `self` up to `ancestor`, or `None` if
    /// `ancestor` is not on the chain. Zero means the kinds are equal.
    pub fn distance_to(self, ancestor: SignalKind) -> Option<u32> {
        let mut current = self;
        let mut distance = 0;
        loop {
            if current == ancestor {
                return Some(distance);
            }
            current = current.parent()?;
            distance += 1;
        }
    }

    /// True if a signal of kind `self` is handled by a callback registered
    /// for `handler`.
    pub fn matches(self, handler: SignalKind) -> bool {
        self.distance_to(handler).is_some()
    }
}
