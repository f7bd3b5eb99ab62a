//! Input ports
//!
//! A single-slot input obtains its value either from an assigned output
//! port or from a direct data pointer. Assigning an output establishes the
//! bidirectional signalling connections: the output's forward sender feeds
//! the input's backward receiver, and the input's backward sender feeds the
//! output's forward receiver. A copy callback keeps the input's pointer in
//! step with the output's.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, trace};

use crate::signals::{Callback, CallbackInvocation, Receiver, Sender, Signal, SignalKind, Slot};

use super::data::{Data, DataRef, SharedData};
use super::errors::{AssignmentError, PortError};
use super::node::ProcessNode;
use super::output::OutputCore;

/// Type-erased core of an input port.
pub struct InputCore {
    payload_type: TypeId,
    payload_name: &'static str,
    backward_sender: Sender,
    backward_receiver: Arc<Receiver>,
    internal_sender: Sender,
    input_set: Arc<Slot>,
    input_set_shared: Arc<Slot>,
    input_unset: Arc<Slot>,
    /// Slots exposed on the backward sender. The sender references them
    /// weakly, so the input keeps them alive.
    owned_slots: Mutex<Vec<Arc<Slot>>>,
    state: Mutex<InputState>,
}

struct InputState {
    data: Option<SharedData>,
    /// The assigned output, if the value came from one.
    output: Option<Arc<OutputCore>>,
    /// The node that produced the assigned output. Held strongly so a
    /// producer cannot be freed while one of its outputs is still wired to
    /// a consumer.
    creator: Option<Arc<dyn ProcessNode>>,
}

impl InputCore {
    pub fn new<T: Send + Sync + 'static>() -> Arc<Self> {
        Self::with_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub(crate) fn with_type(payload_type: TypeId, payload_name: &'static str) -> Arc<Self> {
        let internal_sender = Sender::new();
        let input_set = Slot::new(SignalKind::InputSet);
        let input_set_shared = Slot::new(SignalKind::InputSetToSharedPtr);
        let input_unset = Slot::new(SignalKind::InputUnset);
        internal_sender.register_slot(&input_set);
        internal_sender.register_slot(&input_set_shared);
        internal_sender.register_slot(&input_unset);

        let core = Arc::new(Self {
            payload_type,
            payload_name,
            backward_sender: Sender::new(),
            backward_receiver: Receiver::new(),
            internal_sender,
            input_set,
            input_set_shared,
            input_unset,
            owned_slots: Mutex::new(Vec::new()),
            state: Mutex::new(InputState {
                data: None,
                output: None,
                creator: None,
            }),
        });

        // Keep the data pointer in step with the assigned output. The
        // callback is transparent so it stacks with whatever handlers the
        // owning node registers for the same receiver.
        let weak = Arc::downgrade(&core);
        let tracked: Weak<dyn std::any::Any + Send + Sync> = weak.clone();
        core.backward_receiver.register(Callback::new(
            SignalKind::OutputPointerSet,
            CallbackInvocation::Transparent,
            crate::signals::Tracking::Weak(tracked),
            Box::new(move |signal| {
                if let (Some(input), Signal::OutputPointerSet(data)) = (weak.upgrade(), signal) {
                    input.copy_pointer(data);
                }
            }),
        ));

        core
    }

    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    pub fn payload_name(&self) -> &'static str {
        self.payload_name
    }

    /// Wire this input to a producing output.
    ///
    /// Checks payload compatibility, seeds the value from the output's
    /// current pointer, establishes both signalling connections, and emits
    /// [`Signal::InputSet`] on the internal sender. A previously assigned
    /// output is torn down silently first.
    pub fn accept_output(&self, output: &Arc<OutputCore>) -> Result<(), AssignmentError> {
        if output.payload_type() != self.payload_type {
            return Err(AssignmentError {
                expected: self.payload_name,
                found: output.payload_name(),
            });
        }

        let seeded = output.data();
        {
            let mut state = self.state.lock().unwrap();
            self.teardown_output(&mut state);
            state.data = seeded.clone();
            state.creator = output.node();
            state.output = Some(Arc::clone(output));
        }

        self.internal_sender.connect(&self.backward_receiver);
        output.forward_sender().connect(&self.backward_receiver);
        self.backward_sender.connect(output.forward_receiver());

        trace!("[input<{}>] assigned an output", self.payload_name);
        self.input_set.emit(&Signal::InputSet(seeded));
        Ok(())
    }

    /// Assign a direct data pointer. No producer is recorded; the value is
    /// externally managed and by definition fresh.
    pub fn accept_data(&self, data: SharedData) -> Result<(), AssignmentError> {
        if data.payload_type() != self.payload_type {
            return Err(AssignmentError {
                expected: self.payload_name,
                found: data.payload_name(),
            });
        }

        {
            let mut state = self.state.lock().unwrap();
            self.teardown_output(&mut state);
            state.data = Some(Arc::clone(&data));
            state.creator = None;
        }

        self.internal_sender.connect(&self.backward_receiver);

        trace!("[input<{}>] assigned a direct data pointer", self.payload_name);
        self.input_set_shared.emit(&Signal::InputSetToSharedPtr(data));
        Ok(())
    }

    /// Drop the value and tear down the connections to the previously
    /// assigned output, then emit [`Signal::InputUnset`].
    pub fn unset(&self) {
        let old = {
            let mut state = self.state.lock().unwrap();
            self.teardown_output(&mut state);
            state.creator = None;
            state.data.take()
        };

        trace!("[input<{}>] unset", self.payload_name);
        self.input_unset.emit(&Signal::InputUnset(old));
    }

    /// Sever the signalling connections to the assigned output, without
    /// emitting anything. Caller holds the state lock.
    fn teardown_output(&self, state: &mut InputState) {
        if let Some(output) = state.output.take() {
            output.forward_sender().disconnect(&self.backward_receiver);
            self.backward_sender.disconnect(output.forward_receiver());
        }
    }

    /// Re-copy the producer's pointer after it changed. Connections are
    /// type-checked at `accept`, so a mismatch here means the output was
    /// fed an incompatible cell behind our back; it is logged and ignored.
    fn copy_pointer(&self, data: &SharedData) {
        if data.payload_type() != self.payload_type {
            error!(
                "[input<{}>] ignoring pointer of type {}",
                self.payload_name,
                data.payload_name()
            );
            return;
        }
        self.state.lock().unwrap().data = Some(Arc::clone(data));
    }

    /// Attach a handler to the backward receiver, lifetime-linked to
    /// `owner`: once `owner` is dropped the handler is retired without
    /// firing again.
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

    /// Register a raw callback object on the backward receiver.
    pub fn register_raw_callback(&self, callback: Callback) {
        self.backward_receiver.register(callback);
    }

    /// Expose a slot of the owner on the backward sender so the owner can
    /// push signals upstream through this input. The input takes shared
    /// ownership of the slot; the sender only references it weakly.
    pub fn register_slot(&self, slot: Arc<Slot>) {
        self.backward_sender.register_slot(&slot);
        self.owned_slots.lock().unwrap().push(slot);
    }

    pub fn backward_sender(&self) -> &Sender {
        &self.backward_sender
    }

    pub fn backward_receiver(&self) -> &Arc<Receiver> {
        &self.backward_receiver
    }

    pub fn data(&self) -> Option<SharedData> {
        self.state.lock().unwrap().data.clone()
    }

    pub fn is_valued(&self) -> bool {
        self.state.lock().unwrap().data.is_some()
    }

    pub fn has_assigned_output(&self) -> bool {
        self.state.lock().unwrap().output.is_some()
    }

    pub fn assigned_output(&self) -> Option<Arc<OutputCore>> {
        self.state.lock().unwrap().output.clone()
    }

    /// True if this input can take part in an update: it either already
    /// holds a value or is wired to a producer that can deliver one.
    pub fn is_present(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.data.is_some() || state.output.is_some()
    }
}

/// Typed input port.
pub struct Input<T> {
    core: Arc<InputCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Input<T> {
    pub fn new() -> Self {
        Self {
            core: InputCore::new::<T>(),
            _marker: PhantomData,
        }
    }

    /// Wire to a typed output of the same payload type.
    pub fn accept(&self, output: &super::output::Output<T>) {
        self.core
            .accept_output(output.core())
            .expect("payload types match by construction - this is a bug in the pipeline");
    }

    /// Assign a direct value.
    pub fn accept_value(&self, value: T) {
        self.core
            .accept_data(Data::new(value))
            .expect("payload types match by construction - this is a bug in the pipeline");
    }

    /// Assign a shared cell. Fails if the cell holds a different type.
    pub fn accept_shared(&self, data: SharedData) -> Result<(), AssignmentError> {
        self.core.accept_data(data)
    }

    pub fn unset(&self) {
        self.core.unset();
    }

    /// The current value, if any.
    pub fn get(&self) -> Option<DataRef<T>> {
        self.core.data().and_then(DataRef::new)
    }

    /// The current value, or [`PortError::NullPointer`] if unvalued.
    pub fn read(&self) -> Result<DataRef<T>, PortError> {
        self.get().ok_or(PortError::NullPointer)
    }

    pub fn is_valued(&self) -> bool {
        self.core.is_valued()
    }

    pub fn has_assigned_output(&self) -> bool {
        self.core.has_assigned_output()
    }

    pub fn core(&self) -> &Arc<InputCore> {
        &self.core
    }

    pub fn register_slot(&self, slot: Arc<Slot>) {
        self.core.register_slot(slot);
    }
}

impl<T: Send + Sync + 'static> Default for Input<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}
