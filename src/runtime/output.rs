//! Output ports
//!
//! An output owns the current value of one result of a process node. Data
//! flows forward out of it, update requests arrive backward into it. The
//! value is held as a shared cell so downstream inputs can retain it after
//! the output moves on to a newer one.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::signals::{Callback, Receiver, Sender, Signal, SignalKind, Slot};

use super::data::{Data, DataRef, SharedData};
use super::errors::{AssignmentError, PortError};
use super::node::ProcessNode;

/// Type-erased core of an output port.
///
/// Holds one forward sender (value and invalidation signals out) and one
/// backward receiver (update requests in), plus the current data pointer.
/// At most one data pointer is held at a time; replacing it emits
/// [`Signal::OutputPointerSet`] so connected inputs re-copy the pointer.
pub struct OutputCore {
    payload_type: TypeId,
    payload_name: &'static str,
    forward_sender: Sender,
    forward_receiver: Arc<Receiver>,
    pointer_set: Arc<Slot>,
    /// Slots exposed on the forward sender. The sender references them
    /// weakly, so the output keeps them alive.
    owned_slots: Mutex<Vec<Arc<Slot>>>,
    state: Mutex<OutputState>,
}

struct OutputState {
    data: Option<SharedData>,
    node: Option<Weak<dyn ProcessNode>>,
    dependencies: Vec<Weak<dyn ProcessNode>>,
}

impl OutputCore {
    pub fn new<T: Send + Sync + 'static>() -> Arc<Self> {
        Self::with_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub(crate) fn with_type(payload_type: TypeId, payload_name: &'static str) -> Arc<Self> {
        let forward_sender = Sender::new();
        let pointer_set = Slot::new(SignalKind::OutputPointerSet);
        forward_sender.register_slot(&pointer_set);

        Arc::new(Self {
            payload_type,
            payload_name,
            forward_sender,
            forward_receiver: Receiver::new(),
            pointer_set,
            owned_slots: Mutex::new(Vec::new()),
            state: Mutex::new(OutputState {
                data: None,
                node: None,
                dependencies: Vec::new(),
            }),
        })
    }

    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    pub fn payload_name(&self) -> &'static str {
        self.payload_name
    }

    /// Replace the data pointer and notify connected inputs.
    pub fn set(&self, data: SharedData) -> Result<(), AssignmentError> {
        if data.payload_type() != self.payload_type {
            return Err(AssignmentError {
                expected: self.payload_name,
                found: data.payload_name(),
            });
        }
        {
            let mut state = self.state.lock().unwrap();
            state.data = Some(Arc::clone(&data));
        }
        trace!("[output<{}>] data pointer replaced", self.payload_name);
        // Emitted outside the state lock: the copy callbacks on connected
        // inputs read back into this output.
        self.pointer_set.emit(&Signal::OutputPointerSet(data));
        Ok(())
    }

    /// Drop the data pointer. The value lives on in any input that shares it.
    pub fn reset(&self) {
        self.state.lock().unwrap().data = None;
    }

    pub fn data(&self) -> Option<SharedData> {
        self.state.lock().unwrap().data.clone()
    }

    pub fn is_valued(&self) -> bool {
        self.state.lock().unwrap().data.is_some()
    }

    /// Expose a slot of the owning node on the forward sender. The output
    /// takes shared ownership of the slot; the sender only references it
    /// weakly.
    pub fn register_slot(&self, slot: Arc<Slot>) {
        self.forward_sender.register_slot(&slot);
        self.owned_slots.lock().unwrap().push(slot);
    }

    /// Attach a handler to the backward receiver. Handlers registered here
    /// observe the update requests arriving from downstream.
    pub fn register_callback(&self, callback: Callback) {
        self.forward_receiver.register(callback);
    }

    /// Convenience registration with shared tracking: `target` is pinned
    /// alive for as long as this output holds the callback, so it can still
    /// be notified on teardown.
    pub fn register_shared_callback<T, F>(
        &self,
        kind: SignalKind,
        invocation: crate::signals::CallbackInvocation,
        target: &Arc<T>,
        handler: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.forward_receiver
            .register(Callback::shared(kind, invocation, target, handler));
    }

    pub fn forward_sender(&self) -> &Sender {
        &self.forward_sender
    }

    pub fn forward_receiver(&self) -> &Arc<Receiver> {
        &self.forward_receiver
    }

    /// Record the owning node. First write wins; re-registration of the
    /// same output with a second node must not steal it.
    pub(crate) fn set_node(&self, node: Weak<dyn ProcessNode>) {
        let mut state = self.state.lock().unwrap();
        if state.node.is_none() {
            state.node = Some(node);
        }
    }

    /// The node producing this output, if it is still alive.
    pub fn node(&self) -> Option<Arc<dyn ProcessNode>> {
        self.state
            .lock()
            .unwrap()
            .node
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Record a node this output depends on.
    pub fn add_dependency(&self, node: Weak<dyn ProcessNode>) {
        self.state.lock().unwrap().dependencies.push(node);
    }

    /// The still-living nodes this output depends on.
    pub fn dependencies(&self) -> Vec<Arc<dyn ProcessNode>> {
        self.state
            .lock()
            .unwrap()
            .dependencies
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// Typed output port.
///
/// Wraps an [`OutputCore`] and performs the payload wrapping and unwrapping
/// so user code works with `T` directly.
pub struct Output<T> {
    core: Arc<OutputCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Output<T> {
    /// Create an output with no data yet.
    pub fn new() -> Self {
        Self {
            core: OutputCore::new::<T>(),
            _marker: PhantomData,
        }
    }

    /// Create an output seeded with an initial value.
    pub fn with(value: T) -> Self {
        let output = Self::new();
        output.set(value);
        output
    }

    /// Wrap a value and make it the current data pointer.
    pub fn set(&self, value: T) {
        self.core
            .set(Data::new(value))
            .expect("typed output wraps its own payload type - this is a bug in the pipeline");
    }

    /// Install an already-shared cell as the current data pointer.
    pub fn set_shared(&self, data: SharedData) -> Result<(), AssignmentError> {
        self.core.set(data)
    }

    pub fn reset(&self) {
        self.core.reset();
    }

    /// The current value, if any.
    pub fn get(&self) -> Option<DataRef<T>> {
        self.core.data().and_then(DataRef::new)
    }

    /// The current value, or [`PortError::NullPointer`] if unset.
    pub fn read(&self) -> Result<DataRef<T>, PortError> {
        self.get().ok_or(PortError::NullPointer)
    }

    pub fn core(&self) -> &Arc<OutputCore> {
        &self.core
    }

    pub fn register_slot(&self, slot: Arc<Slot>) {
        self.core.register_slot(slot);
    }

    pub fn register_callback(&self, callback: Callback) {
        self.core.register_callback(callback);
    }
}

impl<T: Send + Sync + 'static> Default for Output<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}
