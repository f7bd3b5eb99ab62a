//! Multi-input ports
//!
//! An ordered, growable sequence of inputs of one payload type. Every
//! `accept` creates a fresh single input, wires it like a standalone input,
//! and appends it to the sequence. Slot groups and multi-callbacks
//! registered with the multi-input are extended onto each new input: one
//! more slot per group, one more callback per registered handler, the
//! handler receiving the ordinal of the new input.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::signals::{
    Callback, CallbackInvocation, Receiver, Sender, Signal, SignalKind, Slot, Slots, Tracking,
};

use super::data::{Data, DataRef, SharedData};
use super::errors::AssignmentError;
use super::input::InputCore;
use super::output::OutputCore;

/// A multi-callback template: re-instantiated for every input added to the
/// multi-input, with the input's ordinal baked into the handler.
struct MultiCallback {
    kind: SignalKind,
    invocation: CallbackInvocation,
    tracking: Tracking,
    handler: Arc<dyn Fn(&Signal, usize) + Send + Sync>,
}

impl MultiCallback {
    fn instantiate(&self, ordinal: usize) -> Callback {
        let handler = Arc::clone(&self.handler);
        Callback::new(
            self.kind,
            self.invocation,
            self.tracking.clone(),
            Box::new(move |signal| handler(signal, ordinal)),
        )
    }
}

/// Type-erased core of a multi-input port.
pub struct MultiInputCore {
    payload_type: TypeId,
    payload_name: &'static str,
    backward_sender: Sender,
    backward_receiver: Arc<Receiver>,
    internal_sender: Sender,
    input_added: Arc<Slot>,
    inputs_cleared: Arc<Slot>,
    state: Mutex<MultiState>,
}

struct MultiState {
    inputs: Vec<Arc<InputCore>>,
    groups: Vec<Arc<Slots>>,
    multi_callbacks: Vec<MultiCallback>,
    internal_connected: bool,
}

impl MultiInputCore {
    pub fn new<T: Send + Sync + 'static>() -> Arc<Self> {
        let internal_sender = Sender::new();
        let input_added = Slot::new(SignalKind::InputAdded);
        let inputs_cleared = Slot::new(SignalKind::InputsCleared);
        internal_sender.register_slot(&input_added);
        internal_sender.register_slot(&inputs_cleared);

        Arc::new(Self {
            payload_type: TypeId::of::<T>(),
            payload_name: std::any::type_name::<T>(),
            backward_sender: Sender::new(),
            backward_receiver: Receiver::new(),
            internal_sender,
            input_added,
            inputs_cleared,
            state: Mutex::new(MultiState {
                inputs: Vec::new(),
                groups: Vec::new(),
                multi_callbacks: Vec::new(),
                internal_connected: false,
            }),
        })
    }

    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    pub fn payload_name(&self) -> &'static str {
        self.payload_name
    }

    /// Acquire a new input wired to `output` and append it.
    pub fn accept_output(&self, output: &Arc<OutputCore>) -> Result<(), AssignmentError> {
        let input = InputCore::with_type(self.payload_type, self.payload_name);
        input.accept_output(output)?;

        self.adopt(&input);

        // The sequence-level connections mirror the per-input ones, so
        // signals addressed to the multi-input as a whole still flow.
        output.forward_sender().connect(&self.backward_receiver);
        self.backward_sender.connect(output.forward_receiver());

        let seeded = input.data();
        trace!("[inputs<{}>] acquired a new input", self.payload_name);
        self.input_added.emit(&Signal::InputAdded(seeded));
        Ok(())
    }

    /// Acquire a new input holding a direct data pointer and append it.
    pub fn accept_data(&self, data: SharedData) -> Result<(), AssignmentError> {
        let input = InputCore::with_type(self.payload_type, self.payload_name);
        input.accept_data(Arc::clone(&data))?;

        self.adopt(&input);

        trace!("[inputs<{}>] acquired a direct-value input", self.payload_name);
        self.input_added.emit(&Signal::InputAdded(Some(data)));
        Ok(())
    }

    /// Append a freshly accepted input: extend every slot group onto it,
    /// instantiate every multi-callback with its ordinal, and make sure the
    /// internal sender reaches the backward receiver.
    fn adopt(&self, input: &Arc<InputCore>) {
        let mut state = self.state.lock().unwrap();
        let ordinal = state.inputs.len();

        for group in &state.groups {
            let slot = group.add_slot();
            input.register_slot(slot);
        }
        for callback in &state.multi_callbacks {
            input.register_raw_callback(callback.instantiate(ordinal));
        }

        state.inputs.push(Arc::clone(input));

        if !state.internal_connected {
            self.internal_sender.connect(&self.backward_receiver);
            state.internal_connected = true;
        }
    }

    /// Drop all inputs and their slot-group slots, then emit
    /// [`Signal::InputsCleared`].
    pub fn clear(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.inputs.clear();
            for group in &state.groups {
                group.clear();
            }
        }
        trace!("[inputs<{}>] cleared", self.payload_name);
        self.inputs_cleared.emit(&Signal::InputsCleared);
    }

    /// Register a growable slot group. Each current and future input gets
    /// one slot of the group registered on its backward sender.
    pub fn register_backward_slots(&self, group: Arc<Slots>) {
        let mut state = self.state.lock().unwrap();
        for input in &state.inputs {
            let slot = group.add_slot();
            input.register_slot(slot);
        }
        state.groups.push(group);
    }

    /// Register a handler instantiated for every input added from now on,
    /// called with the ordinal of the input the signal arrived at. Retired
    /// once `owner` is dropped.
    pub fn register_multi_callbacks<T, F>(
        &self,
        kind: SignalKind,
        invocation: CallbackInvocation,
        owner: &Arc<T>,
        handler: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&Signal, usize) + Send + Sync + 'static,
    {
        let owner_dyn: Arc<dyn std::any::Any + Send + Sync> = owner.clone();
        let tracked: Weak<dyn std::any::Any + Send + Sync> = Arc::downgrade(&owner_dyn);
        self.state.lock().unwrap().multi_callbacks.push(MultiCallback {
            kind,
            invocation,
            tracking: Tracking::Weak(tracked),
            handler: Arc::new(handler),
        });
    }

    /// Attach a handler to the sequence-level backward receiver,
    /// lifetime-linked to `owner`.
    pub fn register_callback<T, F>(
        &self,
        kind: SignalKind,
        invocation: CallbackInvocation,
        owner: &Arc<T>,
        handler: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.backward_receiver
            .register(Callback::weak(kind, invocation, owner, handler));
    }

    pub fn backward_sender(&self) -> &Sender {
        &self.backward_sender
    }

    pub fn backward_receiver(&self) -> &Arc<Receiver> {
        &self.backward_receiver
    }

    pub fn input(&self, ordinal: usize) -> Option<Arc<InputCore>> {
        self.state.lock().unwrap().inputs.get(ordinal).cloned()
    }

    pub fn inputs(&self) -> Vec<Arc<InputCore>> {
        self.state.lock().unwrap().inputs.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed multi-input port.
pub struct MultiInput<T> {
    core: Arc<MultiInputCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> MultiInput<T> {
    pub fn new() -> Self {
        Self {
            core: MultiInputCore::new::<T>(),
            _marker: PhantomData,
        }
    }

    /// Acquire a new input wired to a typed output.
    pub fn accept(&self, output: &super::output::Output<T>) {
        self.core
            .accept_output(output.core())
            .expect("payload types match by construction - this is a bug in the pipeline");
    }

    /// Acquire a new input holding a direct value.
    pub fn accept_value(&self, value: T) {
        self.core
            .accept_data(Data::new(value))
            .expect("payload types match by construction - this is a bug in the pipeline");
    }

    /// Acquire a new input holding a shared cell.
    pub fn accept_shared(&self, data: SharedData) -> Result<(), AssignmentError> {
        self.core.accept_data(data)
    }

    pub fn clear(&self) {
        self.core.clear();
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// The value of the input at `ordinal`, if present and valued.
    pub fn get(&self, ordinal: usize) -> Option<DataRef<T>> {
        self.core.input(ordinal)?.data().and_then(DataRef::new)
    }

    /// The values of all currently valued inputs, in sequence order.
    pub fn values(&self) -> Vec<DataRef<T>> {
        self.core
            .inputs()
            .iter()
            .filter_map(|input| input.data().and_then(DataRef::new))
            .collect()
    }

    pub fn core(&self) -> &Arc<MultiInputCore> {
        &self.core
    }
}

impl<T: Send + Sync + 'static> Default for MultiInput<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MultiInput<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::output::Output;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn grows_one_input_per_accept() {
        let multi = MultiInput::<i32>::new();
        multi.accept_value(2);
        multi.accept_value(3);
        multi.accept_value(5);

        assert_eq!(multi.len(), 3);
        assert_eq!(*multi.get(0).unwrap(), 2);
        assert_eq!(*multi.get(2).unwrap(), 5);
        assert_eq!(multi.values().iter().map(|v| **v).sum::<i32>(), 10);
    }

    #[test]
    fn clear_empties_sequence_and_groups() {
        let multi = MultiInput::<i32>::new();
        let group = Arc::new(Slots::new(SignalKind::Update));
        multi.core().register_backward_slots(Arc::clone(&group));

        multi.accept_value(1);
        multi.accept_value(2);
        assert_eq!(group.len(), 2);

        multi.clear();
        assert!(multi.is_empty());
        assert_eq!(group.len(), 0);
    }

    #[test]
    fn slot_groups_extend_onto_outputs() {
        let output = Output::<i32>::with(1);
        let multi = MultiInput::<i32>::new();
        let group = Arc::new(Slots::new(SignalKind::Update));
        multi.core().register_backward_slots(Arc::clone(&group));

        let pulls = Arc::new(AtomicUsize::new(0));
        let pulls2 = Arc::clone(&pulls);
        output.register_callback(Callback::new(
            SignalKind::Update,
            CallbackInvocation::Exclusive,
            Tracking::Untracked,
            Box::new(move |_| {
                pulls2.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        multi.accept(&output);
        assert_eq!(group.len(), 1);

        group.emit(0, &Signal::Update);
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multi_callbacks_receive_ordinals() {
        let multi = MultiInput::<i32>::new();
        let owner = Arc::new(());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = Arc::clone(&seen);
        multi.core().register_multi_callbacks(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &owner,
            move |_, ordinal| {
                seen2.lock().unwrap().push(ordinal);
            },
        );

        let first = Output::<i32>::with(1);
        let second = Output::<i32>::with(2);
        multi.accept(&first);
        multi.accept(&second);

        // A Modified arriving through the second output's forward channel
        // reports the ordinal of the second input.
        let slot = Slot::new(SignalKind::Modified);
        second.register_slot(Arc::clone(&slot));
        slot.emit(&Signal::Modified);

        assert_eq!(seen.lock().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn sequence_payload_type_is_enforced() {
        let multi = MultiInput::<i32>::new();
        let err = multi.core().accept_data(Data::new(1.0f64)).unwrap_err();
        assert_eq!(err.expected, std::any::type_name::<i32>());
        assert_eq!(multi.len(), 0);
    }

    #[test]
    fn input_added_counts_track_accepts() {
        let multi = MultiInput::<i32>::new();
        let owner = Arc::new(());
        let added = Arc::new(AtomicUsize::new(0));

        let added2 = Arc::clone(&added);
        multi.core().register_callback(
            SignalKind::InputAdded,
            CallbackInvocation::Exclusive,
            &owner,
            move |_| {
                added2.fetch_add(1, Ordering::SeqCst);
            },
        );

        multi.accept_value(7);
        multi.accept_value(8);
        assert_eq!(added.load(Ordering::SeqCst), 2);
    }
}
