//! Process node base: named and ordered port registries
//!
//! A node owns inputs, multi-inputs and outputs, addressable by ordinal or
//! by registration name. The base offers thin delegates (`set_input`,
//! `add_input`, `unset_input`, `clear_inputs`) that forward to the port's
//! own `accept`/`unset`/`clear`. Nodes are always used through shared
//! handles; the base stores a weak self-handle installed by
//! [`Process::new`](super::process::Process::new) so ports and callbacks
//! can upgrade back to the owning node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use super::data::SharedData;
use super::errors::{PipelineError, PortError};
use super::input::InputCore;
use super::inputs::MultiInputCore;
use super::output::OutputCore;

/// A computational unit with inputs, outputs and a recomputation routine.
///
/// Implementors embed a [`SimpleNode`](super::simple::SimpleNode) (or a bare
/// [`NodeCore`]) and expose it through [`ProcessNode::node`]; the engine
/// calls [`ProcessNode::update_outputs`] with the locking dictated by the
/// node's strategy once all inputs are up to date.
pub trait ProcessNode: Send + Sync + 'static {
    /// The port registry of this node.
    fn node(&self) -> &NodeCore;

    /// Recompute the outputs from the inputs. Invoked by the engine with
    /// all inputs up to date; inputs are read-locked and outputs
    /// write-locked according to the node's locking strategy.
    fn update_outputs(&self) {}
}

/// Port registries of one process node.
pub struct NodeCore {
    name: String,
    registry: Mutex<Registry>,
    self_handle: Mutex<Option<Weak<dyn ProcessNode>>>,
}

#[derive(Default)]
struct Registry {
    inputs: Vec<Arc<InputCore>>,
    input_names: HashMap<String, usize>,
    multi_inputs: Vec<Arc<MultiInputCore>>,
    multi_input_names: HashMap<String, usize>,
    outputs: Vec<Arc<OutputCore>>,
    output_names: HashMap<String, usize>,
}

impl NodeCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Mutex::new(Registry::default()),
            self_handle: Mutex::new(None),
        }
    }

    /// Name identifying this node in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an input under `name`. Returns its ordinal.
    pub fn register_input(&self, input: &Arc<InputCore>, name: impl Into<String>) -> usize {
        let name = name.into();
        let mut registry = self.registry.lock().unwrap();
        let ordinal = registry.inputs.len();
        trace!("[{}] got a new input '{}'", self.name, name);
        registry.inputs.push(Arc::clone(input));
        registry.input_names.insert(name, ordinal);
        ordinal
    }

    /// Register a multi-input under `name`. Returns its ordinal.
    pub fn register_inputs(&self, multi: &Arc<MultiInputCore>, name: impl Into<String>) -> usize {
        let name = name.into();
        let mut registry = self.registry.lock().unwrap();
        let ordinal = registry.multi_inputs.len();
        trace!("[{}] got a new multi-input '{}'", self.name, name);
        registry.multi_inputs.push(Arc::clone(multi));
        registry.multi_input_names.insert(name, ordinal);
        ordinal
    }

    /// Register an output under `name`. Returns its ordinal. The node is
    /// recorded as the output's producer and dependency once the node is
    /// wrapped in a [`Process`](super::process::Process) handle.
    pub fn register_output(&self, output: &Arc<OutputCore>, name: impl Into<String>) -> usize {
        let name = name.into();
        let mut registry = self.registry.lock().unwrap();
        let ordinal = registry.outputs.len();
        trace!("[{}] got a new output '{}'", self.name, name);
        registry.outputs.push(Arc::clone(output));
        registry.output_names.insert(name, ordinal);
        if let Some(me) = self.self_handle.lock().unwrap().clone() {
            output.set_node(me.clone());
            output.add_dependency(me);
        }
        ordinal
    }

    pub fn input(&self, ordinal: usize) -> Result<Arc<InputCore>, PortError> {
        let registry = self.registry.lock().unwrap();
        registry
            .inputs
            .get(ordinal)
            .cloned()
            .ok_or(PortError::NotEnoughInputs {
                index: ordinal,
                size: registry.inputs.len(),
            })
    }

    pub fn input_named(&self, name: &str) -> Result<Arc<InputCore>, PortError> {
        let registry = self.registry.lock().unwrap();
        registry
            .input_names
            .get(name)
            .map(|&ordinal| Arc::clone(&registry.inputs[ordinal]))
            .ok_or_else(|| PortError::NoSuchInput(name.to_string()))
    }

    pub fn multi_input(&self, ordinal: usize) -> Result<Arc<MultiInputCore>, PortError> {
        let registry = self.registry.lock().unwrap();
        registry
            .multi_inputs
            .get(ordinal)
            .cloned()
            .ok_or(PortError::NotEnoughInputs {
                index: ordinal,
                size: registry.multi_inputs.len(),
            })
    }

    pub fn multi_input_named(&self, name: &str) -> Result<Arc<MultiInputCore>, PortError> {
        let registry = self.registry.lock().unwrap();
        registry
            .multi_input_names
            .get(name)
            .map(|&ordinal| Arc::clone(&registry.multi_inputs[ordinal]))
            .ok_or_else(|| PortError::NoSuchInput(name.to_string()))
    }

    pub fn output(&self, ordinal: usize) -> Result<Arc<OutputCore>, PortError> {
        let registry = self.registry.lock().unwrap();
        registry
            .outputs
            .get(ordinal)
            .cloned()
            .ok_or(PortError::NotEnoughOutputs {
                index: ordinal,
                size: registry.outputs.len(),
            })
    }

    pub fn output_named(&self, name: &str) -> Result<Arc<OutputCore>, PortError> {
        let registry = self.registry.lock().unwrap();
        registry
            .output_names
            .get(name)
            .map(|&ordinal| Arc::clone(&registry.outputs[ordinal]))
            .ok_or_else(|| PortError::NoSuchOutput(name.to_string()))
    }

    pub fn num_inputs(&self) -> usize {
        self.registry.lock().unwrap().inputs.len()
    }

    pub fn num_multi_inputs(&self) -> usize {
        self.registry.lock().unwrap().multi_inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.registry.lock().unwrap().outputs.len()
    }

    pub(crate) fn inputs(&self) -> Vec<Arc<InputCore>> {
        self.registry.lock().unwrap().inputs.clone()
    }

    pub(crate) fn outputs(&self) -> Vec<Arc<OutputCore>> {
        self.registry.lock().unwrap().outputs.clone()
    }

    /// Find the ordinal of a registered output by identity.
    pub(crate) fn output_ordinal(&self, output: &Arc<OutputCore>) -> Option<usize> {
        self.registry
            .lock()
            .unwrap()
            .outputs
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, output))
    }

    /// Find the ordinal of a registered input by identity.
    pub(crate) fn input_ordinal(&self, input: &Arc<InputCore>) -> Option<usize> {
        self.registry
            .lock()
            .unwrap()
            .inputs
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, input))
    }

    // ── thin delegates ──────────────────────────────────────────────────

    /// Assign the `ordinal`th input to the given output.
    pub fn set_input(&self, ordinal: usize, output: &Arc<OutputCore>) -> Result<(), PipelineError> {
        self.input(ordinal)?.accept_output(output)?;
        Ok(())
    }

    /// Assign a named input to the given output.
    pub fn set_input_named(&self, name: &str, output: &Arc<OutputCore>) -> Result<(), PipelineError> {
        self.input_named(name)?.accept_output(output)?;
        Ok(())
    }

    /// Assign the `ordinal`th input to a direct data pointer.
    pub fn set_input_data(&self, ordinal: usize, data: SharedData) -> Result<(), PipelineError> {
        self.input(ordinal)?.accept_data(data)?;
        Ok(())
    }

    /// Assign a named input to a direct data pointer.
    pub fn set_input_data_named(&self, name: &str, data: SharedData) -> Result<(), PipelineError> {
        self.input_named(name)?.accept_data(data)?;
        Ok(())
    }

    /// Assign the `ordinal`th input to the same source as another input:
    /// its assigned output if it has one, otherwise its direct value.
    pub fn set_input_from(&self, ordinal: usize, other: &InputCore) -> Result<(), PipelineError> {
        let input = self.input(ordinal)?;
        if let Some(output) = other.assigned_output() {
            input.accept_output(&output)?;
        } else if let Some(data) = other.data() {
            input.accept_data(data)?;
        } else {
            return Err(PortError::NullPointer.into());
        }
        Ok(())
    }

    /// Unset the `ordinal`th input.
    pub fn unset_input(&self, ordinal: usize) -> Result<(), PortError> {
        self.input(ordinal)?.unset();
        Ok(())
    }

    /// Unset a named input.
    pub fn unset_input_named(&self, name: &str) -> Result<(), PortError> {
        self.input_named(name)?.unset();
        Ok(())
    }

    /// Add an output to the `ordinal`th multi-input.
    pub fn add_input(&self, ordinal: usize, output: &Arc<OutputCore>) -> Result<(), PipelineError> {
        self.multi_input(ordinal)?.accept_output(output)?;
        Ok(())
    }

    /// Add an output to a named multi-input.
    pub fn add_input_named(&self, name: &str, output: &Arc<OutputCore>) -> Result<(), PipelineError> {
        self.multi_input_named(name)?.accept_output(output)?;
        Ok(())
    }

    /// Add a direct data pointer to the `ordinal`th multi-input.
    pub fn add_input_data(&self, ordinal: usize, data: SharedData) -> Result<(), PipelineError> {
        self.multi_input(ordinal)?.accept_data(data)?;
        Ok(())
    }

    /// Clear the `ordinal`th multi-input.
    pub fn clear_inputs(&self, ordinal: usize) -> Result<(), PortError> {
        self.multi_input(ordinal)?.clear();
        Ok(())
    }

    /// Clear a named multi-input.
    pub fn clear_inputs_named(&self, name: &str) -> Result<(), PortError> {
        self.multi_input_named(name)?.clear();
        Ok(())
    }

    // ── self handle ─────────────────────────────────────────────────────

    /// Install the shared self-handle. Called by
    /// [`Process::new`](super::process::Process::new); also back-fills the
    /// producer reference on every already-registered output.
    pub(crate) fn set_self_handle(&self, me: Weak<dyn ProcessNode>) {
        *self.self_handle.lock().unwrap() = Some(me.clone());
        for output in self.outputs() {
            output.set_node(me.clone());
            output.add_dependency(me.clone());
        }
    }

    /// Upgrade to the shared node handle, if the node is still alive and
    /// has been wrapped in a `Process`.
    pub fn self_handle(&self) -> Option<Arc<dyn ProcessNode>> {
        self.self_handle
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
    }
}
