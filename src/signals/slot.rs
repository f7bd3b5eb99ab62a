//! Slots: the emitting end of a connection

use std::sync::{Arc, Mutex, Weak};

use super::receiver::Receiver;
use super::signal::{Signal, SignalKind};

/// An emission point for one kind of signal.
///
/// A slot holds weak references to the receivers it is connected to, so a
/// dropped receiver silently falls out of the distribution list. Emission
/// is synchronous: every connected receiver is serviced on the calling
/// thread before `emit` returns.
pub struct Slot {
    kind: SignalKind,
    receivers: Mutex<Vec<Weak<Receiver>>>,
}

impl Slot {
    pub fn new(kind: SignalKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            receivers: Mutex::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Emit a signal to all connected receivers, in connection order.
    pub fn emit(&self, signal: &Signal) {
        debug_assert!(
            signal.kind().matches(self.kind),
            "signal kind {:?} emitted on a {:?} slot",
            signal.kind(),
            self.kind
        );

        let targets: Vec<Arc<Receiver>> = {
            let mut receivers = self.receivers.lock().unwrap();
            receivers.retain(|weak| weak.strong_count() > 0);
            receivers.iter().filter_map(Weak::upgrade).collect()
        };

        for receiver in targets {
            receiver.deliver(signal);
        }
    }

    /// Connect this slot to a receiver. Connecting twice is a no-op.
    pub(crate) fn connect(&self, receiver: &Arc<Receiver>) {
        let mut receivers = self.receivers.lock().unwrap();
        let already = receivers
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|r| Arc::ptr_eq(&r, receiver)));
        if !already {
            receivers.push(Arc::downgrade(receiver));
        }
    }

    /// Remove a receiver from the distribution list.
    pub(crate) fn disconnect(&self, receiver: &Arc<Receiver>) {
        self.receivers
            .lock()
            .unwrap()
            .retain(|weak| weak.upgrade().is_some_and(|r| !Arc::ptr_eq(&r, receiver)));
    }

    /// Number of live connections. Mainly useful in tests.
    pub fn num_receivers(&self) -> usize {
        let mut receivers = self.receivers.lock().unwrap();
        receivers.retain(|weak| weak.strong_count() > 0);
        receivers.len()
    }
}

/// A growable vector of slots of one kind, addressable by index.
///
/// Used where one emission point is needed per dynamically registered
/// port: one `Update` slot per input, one `Modified` slot per output.
/// The vector holds its slots weakly, like a sender does: `add_slot`
/// returns the owning handle, the registering port retains it, and a
/// slot whose owner dropped it falls out of the vector.
pub struct Slots {
    kind: SignalKind,
    slots: Mutex<Vec<Weak<Slot>>>,
}

impl Slots {
    pub fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Append a fresh slot and return the owning handle. The vector keeps
    /// only a weak reference.
    pub fn add_slot(&self) -> Arc<Slot> {
        let slot = Slot::new(self.kind);
        self.slots.lock().unwrap().push(Arc::downgrade(&slot));
        slot
    }

    pub fn get(&self, index: usize) -> Option<Arc<Slot>> {
        self.slots.lock().unwrap().get(index).and_then(Weak::upgrade)
    }

    /// Number of slots whose owner is still alive. Expired entries are
    /// pruned here.
    pub fn len(&self) -> usize {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|weak| weak.strong_count() > 0);
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all slots. Connections made through them die with them.
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    /// Emit on the slot at `index`; a no-op if the index is out of range.
    pub fn emit(&self, index: usize, signal: &Signal) {
        if let Some(slot) = self.get(index) {
            slot.emit(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{Callback, CallbackInvocation, Tracking};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_connected_receiver() {
        let slot = Slot::new(SignalKind::Modified);
        let receiver = Receiver::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        receiver.register(Callback::new(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            Tracking::Untracked,
            Box::new(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        slot.connect(&receiver);
        slot.connect(&receiver); // idempotent
        assert_eq!(slot.num_receivers(), 1);

        slot.emit(&Signal::Modified);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let slot = Slot::new(SignalKind::Update);
        let receiver = Receiver::new();
        slot.connect(&receiver);
        drop(receiver);
        slot.emit(&Signal::Update);
        assert_eq!(slot.num_receivers(), 0);
    }

    #[test]
    fn disconnect_removes_connection() {
        let slot = Slot::new(SignalKind::Update);
        let receiver = Receiver::new();
        slot.connect(&receiver);
        slot.disconnect(&receiver);
        assert_eq!(slot.num_receivers(), 0);
    }

    #[test]
    fn slots_grow_and_clear() {
        let slots = Slots::new(SignalKind::Update);
        let first = slots.add_slot();
        let _second = slots.add_slot();
        assert_eq!(slots.len(), 2);
        assert!(Arc::ptr_eq(&first, &slots.get(0).unwrap()));

        slots.clear();
        assert!(slots.is_empty());
        assert!(slots.get(0).is_none());
    }

    #[test]
    fn dropped_slot_falls_out_of_the_vector() {
        let slots = Slots::new(SignalKind::Update);
        let kept = slots.add_slot();
        drop(slots.add_slot());

        assert_eq!(slots.len(), 1);
        assert!(Arc::ptr_eq(&kept, &slots.get(0).unwrap()));
    }
}
