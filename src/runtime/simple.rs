//! Dirty tracking and the pull update protocol
//!
//! [`SimpleNode`] is the engine state embedded by every ordinary process
//! node: one dirty flag per input and per output, an `Update` slot per
//! input, a `Modified` slot per output, and the pull protocol tying them
//! together. An update request for an output first fans out `Update`
//! signals to every dirty input (optionally on worker threads from the
//! process-wide budget), then, if the output is still flagged dirty and all
//! required inputs are present, runs the locking cascade around the user's
//! `update_outputs`.
//!
//! A deliberate race is left open: between the fan-out and the dirty-flag
//! check, a `Modified` arriving from another thread may re-flag an input.
//! The engine does not lock across that window; the re-flag relays forward,
//! so the next downstream pull repeats the recomputation instead.

use std::sync::{Arc, Mutex, Weak};

use tracing::{error, trace};

use crate::signals::{Callback, CallbackInvocation, Signal, SignalKind, Slot, Slots, Tracking};

use super::config;
use super::errors::PortError;
use super::input::{Input, InputCore};
use super::inputs::{MultiInput, MultiInputCore};
use super::node::{NodeCore, ProcessNode};
use super::output::{Output, OutputCore};

/// Whether an input must be assigned before outputs can be computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    Required,
    Optional,
}

/// Which value mutexes to take around `update_outputs`.
///
/// `Full` read-locks every input value and write-locks every output value,
/// so downstream readers block only while this node writes. The relaxed
/// strategies leave one or both sides to the node implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Locking {
    None,
    InputOnly,
    OutputOnly,
    #[default]
    Full,
}

impl Locking {
    fn locks_inputs(self) -> bool {
        matches!(self, Locking::InputOnly | Locking::Full)
    }

    fn locks_outputs(self) -> bool {
        matches!(self, Locking::OutputOnly | Locking::Full)
    }
}

/// Engine state of one process node.
///
/// Embed one per node, register the node's ports through it, and expose the
/// inner [`NodeCore`] via [`ProcessNode::node`].
pub struct SimpleNode {
    core: Arc<NodeCore>,
    state: Arc<NodeState>,
}

impl SimpleNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_locking(name, Locking::Full)
    }

    pub fn with_locking(name: impl Into<String>, locking: Locking) -> Self {
        let core = Arc::new(NodeCore::new(name));
        let state = Arc::new(NodeState {
            name: core.name().to_string(),
            core: Arc::clone(&core),
            locking,
            dirty: Mutex::new(DirtyState::default()),
            output_dirty: Mutex::new(Vec::new()),
            required: Mutex::new(Vec::new()),
            masks: Mutex::new(Vec::new()),
            input_updates: Slots::new(SignalKind::Update),
            multi_updates: Mutex::new(Vec::new()),
            modified: Slots::new(SignalKind::Modified),
            update_mutex: Mutex::new(()),
        });
        Self { core, state }
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Register a typed input, wiring its dirty tracking.
    pub fn register_input<T: Send + Sync + 'static>(
        &self,
        input: &Input<T>,
        name: impl Into<String>,
        input_type: InputType,
    ) {
        self.register_input_core(input.core(), name, input_type);
    }

    /// Register a type-erased input, wiring its dirty tracking.
    ///
    /// The input starts dirty if required, clean if optional, so an absent
    /// optional input never blocks the first pull.
    pub fn register_input_core(
        &self,
        input: &Arc<InputCore>,
        name: impl Into<String>,
        input_type: InputType,
    ) {
        let ordinal = self.core.register_input(input, name);
        let required = input_type == InputType::Required;

        self.state.dirty.lock().unwrap().inputs.push(required);
        self.state.required.lock().unwrap().push(required);
        self.state.masks.lock().unwrap().push(Vec::new());

        let slot = self.state.input_updates.add_slot();
        input.register_slot(slot);

        // An InputSet is a Modified, so assignment changes land in the same
        // handler. Direct-pointer assignments are by definition fresh and
        // get their own, more specific handler.
        let weak = Arc::downgrade(&self.state);
        input.register_callback(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &self.state,
            move |_| {
                if let Some(state) = weak.upgrade() {
                    state.on_input_modified(ordinal);
                }
            },
        );
        let weak = Arc::downgrade(&self.state);
        input.register_callback(
            SignalKind::InputSetToSharedPtr,
            CallbackInvocation::Exclusive,
            &self.state,
            move |_| {
                if let Some(state) = weak.upgrade() {
                    state.on_input_set_shared(ordinal);
                }
            },
        );

        self.state.set_all_outputs_dirty();
    }

    /// Register a typed multi-input, wiring its dirty tracking.
    pub fn register_inputs<T: Send + Sync + 'static>(
        &self,
        multi: &MultiInput<T>,
        name: impl Into<String>,
    ) {
        self.register_inputs_core(multi.core(), name);
    }

    /// Register a type-erased multi-input, wiring its dirty tracking.
    pub fn register_inputs_core(&self, multi: &Arc<MultiInputCore>, name: impl Into<String>) {
        let ordinal = self.core.register_inputs(multi, name);

        self.state.dirty.lock().unwrap().multi.push(Vec::new());

        let group = Arc::new(Slots::new(SignalKind::Update));
        self.state
            .multi_updates
            .lock()
            .unwrap()
            .push(Arc::clone(&group));
        multi.register_backward_slots(group);

        let weak = Arc::downgrade(&self.state);
        multi.register_callback(
            SignalKind::InputAdded,
            CallbackInvocation::Exclusive,
            &self.state,
            move |_| {
                if let Some(state) = weak.upgrade() {
                    state.on_input_added(ordinal);
                }
            },
        );
        let weak = Arc::downgrade(&self.state);
        multi.register_callback(
            SignalKind::InputsCleared,
            CallbackInvocation::Exclusive,
            &self.state,
            move |_| {
                if let Some(state) = weak.upgrade() {
                    state.on_inputs_cleared(ordinal);
                }
            },
        );
        let weak = Arc::downgrade(&self.state);
        multi.register_multi_callbacks(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &self.state,
            move |_, input_ordinal| {
                if let Some(state) = weak.upgrade() {
                    state.on_multi_input_modified(ordinal, input_ordinal);
                }
            },
        );

        self.state.set_all_outputs_dirty();
    }

    /// Register a typed output, wiring its update entry point.
    pub fn register_output<T: Send + Sync + 'static>(
        &self,
        output: &Output<T>,
        name: impl Into<String>,
    ) {
        self.register_output_core(output.core(), name);
    }

    /// Register a type-erased output, wiring its update entry point.
    pub fn register_output_core(&self, output: &Arc<OutputCore>, name: impl Into<String>) {
        let ordinal = self.core.register_output(output, name);

        self.state.output_dirty.lock().unwrap().push(true);

        let slot = self.state.modified.add_slot();
        output.register_slot(slot);

        let weak = Arc::downgrade(&self.state);
        let state_dyn: Arc<dyn std::any::Any + Send + Sync> = self.state.clone();
        let tracked: Weak<dyn std::any::Any + Send + Sync> = Arc::downgrade(&state_dyn);
        output.register_callback(Callback::new(
            SignalKind::Update,
            CallbackInvocation::Exclusive,
            Tracking::Weak(tracked),
            Box::new(move |_| {
                if let Some(state) = weak.upgrade() {
                    state.on_update(Some(ordinal));
                }
            }),
        ));
    }

    /// Bring all inputs up to date, recomputing outputs if needed. Behaves
    /// like an update request that is not tied to any particular output.
    pub fn update_inputs(&self) {
        self.state.on_update(None);
    }

    /// Flag a typed output as needing recomputation and relay `Modified`
    /// downstream. Use whenever node state outside the port system changed.
    pub fn set_dirty<T: Send + Sync + 'static>(&self, output: &Output<T>) -> Result<(), PortError> {
        self.set_dirty_core(output.core())
    }

    /// Flag a type-erased output as needing recomputation.
    pub fn set_dirty_core(&self, output: &Arc<OutputCore>) -> Result<(), PortError> {
        let ordinal = self
            .core
            .output_ordinal(output)
            .ok_or_else(|| PortError::NoSuchOutput("output is not registered with this node".into()))?;
        self.state.mark_output_dirty(ordinal);
        Ok(())
    }

    /// Declare that `output` depends on `input`. By default every output
    /// depends on every input; the first declaration for an input narrows
    /// its fan-out to the declared outputs.
    pub fn set_dependency<T, U>(&self, input: &Input<T>, output: &Output<U>) -> Result<(), PortError>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
    {
        self.set_dependency_core(input.core(), output.core())
    }

    /// Type-erased variant of [`SimpleNode::set_dependency`].
    pub fn set_dependency_core(
        &self,
        input: &Arc<InputCore>,
        output: &Arc<OutputCore>,
    ) -> Result<(), PortError> {
        let input_ordinal = self
            .core
            .input_ordinal(input)
            .ok_or_else(|| PortError::NoSuchInput("input is not registered with this node".into()))?;
        let output_ordinal = self
            .core
            .output_ordinal(output)
            .ok_or_else(|| PortError::NoSuchOutput("output is not registered with this node".into()))?;

        let mut masks = self.state.masks.lock().unwrap();
        if !masks[input_ordinal].contains(&output_ordinal) {
            masks[input_ordinal].push(output_ordinal);
        }
        Ok(())
    }
}

#[derive(Default)]
struct DirtyState {
    /// One flag per single input.
    inputs: Vec<bool>,
    /// One flag vector per multi-input, growing on `InputAdded` and
    /// emptying on `InputsCleared`.
    multi: Vec<Vec<bool>>,
}

/// A dirty input selected for fan-out, resolved to its update slot.
enum UpdateTarget {
    Single(usize),
    Multi(usize, usize),
}

struct NodeState {
    name: String,
    core: Arc<NodeCore>,
    locking: Locking,
    dirty: Mutex<DirtyState>,
    output_dirty: Mutex<Vec<bool>>,
    required: Mutex<Vec<bool>>,
    /// Per single input: the outputs depending on it. Empty means all.
    masks: Mutex<Vec<Vec<usize>>>,
    input_updates: Slots,
    multi_updates: Mutex<Vec<Arc<Slots>>>,
    modified: Slots,
    /// Serializes the update protocol per node.
    update_mutex: Mutex<()>,
}

impl NodeState {
    // ── signal handlers ─────────────────────────────────────────────────

    fn on_input_modified(&self, input: usize) {
        trace!("[{}] input {} was modified", self.name, input);
        if let Some(flag) = self.dirty.lock().unwrap().inputs.get_mut(input) {
            *flag = true;
        }
        self.relay_modified(Some(input));
    }

    fn on_input_set_shared(&self, input: usize) {
        trace!("[{}] input {} was set to a direct data pointer", self.name, input);
        // A direct pointer is a fixed, externally managed value: the input
        // itself is fresh, but every output computed without it is stale.
        if let Some(flag) = self.dirty.lock().unwrap().inputs.get_mut(input) {
            *flag = false;
        }
        self.set_all_outputs_dirty();
        self.relay_modified(Some(input));
    }

    fn on_input_added(&self, multi: usize) {
        trace!("[{}] multi-input {} got a new input", self.name, multi);
        if let Some(flags) = self.dirty.lock().unwrap().multi.get_mut(multi) {
            flags.push(true);
        }
    }

    fn on_inputs_cleared(&self, multi: usize) {
        trace!("[{}] multi-input {} was cleared", self.name, multi);
        if let Some(flags) = self.dirty.lock().unwrap().multi.get_mut(multi) {
            flags.clear();
        }
    }

    fn on_multi_input_modified(&self, multi: usize, input: usize) {
        trace!(
            "[{}] multi-input {} was modified in input {}",
            self.name, multi, input
        );
        if let Some(flag) = self
            .dirty
            .lock()
            .unwrap()
            .multi
            .get_mut(multi)
            .and_then(|flags| flags.get_mut(input))
        {
            *flag = true;
        }
        self.relay_modified(None);
    }

    fn mark_output_dirty(&self, output: usize) {
        trace!("[{}] output {} was set dirty", self.name, output);
        if let Some(flag) = self.output_dirty.lock().unwrap().get_mut(output) {
            *flag = true;
        }
        self.modified.emit(output, &Signal::Modified);
    }

    /// Relay `Modified` on every output depending on `input` (on every
    /// output if `input` is `None`).
    fn relay_modified(&self, input: Option<usize>) {
        for output in 0..self.modified.len() {
            let allowed = match input {
                Some(input) => self.mask_allows(input, output),
                None => true,
            };
            if allowed {
                self.modified.emit(output, &Signal::Modified);
            }
        }
    }

    fn mask_allows(&self, input: usize, output: usize) -> bool {
        let masks = self.masks.lock().unwrap();
        match masks.get(input) {
            Some(mask) => mask.is_empty() || mask.contains(&output),
            None => true,
        }
    }

    fn set_all_outputs_dirty(&self) {
        for flag in self.output_dirty.lock().unwrap().iter_mut() {
            *flag = true;
        }
    }

    // ── the pull protocol ───────────────────────────────────────────────

    /// Service an update request. `target` is the requested output, or
    /// `None` for a user-initiated refresh of everything.
    fn on_update(&self, target: Option<usize>) {
        let _update = self.update_mutex.lock().unwrap();
        match target {
            Some(output) => trace!("[{}] update requested for output {}", self.name, output),
            None => trace!("[{}] update requested by user", self.name),
        }

        let targets = self.take_dirty_targets(target);
        if !targets.is_empty() {
            trace!("[{}] {} dirty inputs, fanning out", self.name, targets.len());
            self.set_all_outputs_dirty();
            self.dispatch_updates(targets);
        }

        let run = {
            let mut output_dirty = self.output_dirty.lock().unwrap();
            let is_dirty = match target {
                Some(output) => output_dirty.get(output).copied().unwrap_or(false),
                None => output_dirty.iter().any(|flag| *flag),
            };
            if !is_dirty {
                trace!("[{}] outputs are up-to-date", self.name);
                false
            } else if !self.required_inputs_present() {
                error!(
                    "[{}] a required input is absent, not updating outputs",
                    self.name
                );
                false
            } else {
                // Optimistic clear: a Modified racing in after this point
                // re-flags the output and relays forward, so the next pull
                // recomputes.
                for flag in output_dirty.iter_mut() {
                    *flag = false;
                }
                true
            }
        };

        if run {
            self.run_update();
        }
    }

    /// Collect and clear the dirty flags of every input taking part in an
    /// update of `target`, resolved to their update slots.
    fn take_dirty_targets(&self, target: Option<usize>) -> Vec<Arc<Slot>> {
        let mut selected = Vec::new();
        {
            let mut dirty = self.dirty.lock().unwrap();
            for (input, flag) in dirty.inputs.iter_mut().enumerate() {
                let participates = match target {
                    Some(output) => self.mask_allows(input, output),
                    None => true,
                };
                if *flag && participates {
                    *flag = false;
                    selected.push(UpdateTarget::Single(input));
                }
            }
            for (multi, flags) in dirty.multi.iter_mut().enumerate() {
                for (input, flag) in flags.iter_mut().enumerate() {
                    if *flag {
                        *flag = false;
                        selected.push(UpdateTarget::Multi(multi, input));
                    }
                }
            }
        }

        let multi_updates = self.multi_updates.lock().unwrap();
        selected
            .into_iter()
            .filter_map(|target| match target {
                UpdateTarget::Single(input) => self.input_updates.get(input),
                UpdateTarget::Multi(multi, input) => {
                    multi_updates.get(multi).and_then(|group| group.get(input))
                }
            })
            .collect()
    }

    /// Ask every selected input for a fresh value. The last target always
    /// runs inline; the others borrow worker threads from the process-wide
    /// budget while any are available. All workers are joined before this
    /// returns, then the borrowed threads are returned to the budget.
    fn dispatch_updates(&self, slots: Vec<Arc<Slot>>) {
        let total = slots.len();
        let mut spawned = 0usize;

        std::thread::scope(|scope| {
            for (index, slot) in slots.iter().enumerate() {
                let remaining = total - index;
                if remaining > 1 && config::try_take_thread() {
                    spawned += 1;
                    let slot = Arc::clone(slot);
                    scope.spawn(move || {
                        slot.emit(&Signal::Update);
                    });
                } else {
                    slot.emit(&Signal::Update);
                }
            }
        });

        if spawned > 0 {
            trace!("[{}] joined {} update workers", self.name, spawned);
        }
        config::release_threads(spawned);
    }

    /// An input is present if it holds a value or is wired to a producer.
    fn required_inputs_present(&self) -> bool {
        let required = self.required.lock().unwrap().clone();
        for (input, port) in self.core.inputs().iter().enumerate() {
            if required.get(input).copied().unwrap_or(false) && !port.is_present() {
                return false;
            }
        }
        true
    }

    /// The locking cascade: recurse through the inputs, then the outputs,
    /// then invoke the node's `update_outputs` with all guards on the stack.
    fn run_update(&self) {
        let Some(node) = self.core.self_handle() else {
            error!(
                "[{}] node is not wrapped in a process handle, cannot update outputs",
                self.name
            );
            return;
        };
        let inputs = self.core.inputs();
        let outputs = self.core.outputs();
        trace!("[{}] updating outputs", self.name);
        self.lock_inputs(&*node, &inputs, &outputs, 0);
    }

    fn lock_inputs(
        &self,
        node: &dyn ProcessNode,
        inputs: &[Arc<InputCore>],
        outputs: &[Arc<OutputCore>],
        index: usize,
    ) {
        if index == inputs.len() {
            self.lock_outputs(node, outputs, 0);
            return;
        }
        if self.locking.locks_inputs()
            && let Some(data) = inputs[index].data()
        {
            let _shared = data.mutex().read().unwrap();
            self.lock_inputs(node, inputs, outputs, index + 1);
        } else {
            self.lock_inputs(node, inputs, outputs, index + 1);
        }
    }

    fn lock_outputs(&self, node: &dyn ProcessNode, outputs: &[Arc<OutputCore>], index: usize) {
        if index == outputs.len() {
            node.update_outputs();
            return;
        }
        if self.locking.locks_outputs()
            && let Some(data) = outputs[index].data()
        {
            // The cell is held here as well as locked: the node may replace
            // the output's pointer while we hold the old cell's mutex, and
            // the guard must not outlive the cell.
            let _exclusive = data.mutex().write().unwrap();
            self.lock_outputs(node, outputs, index + 1);
        } else {
            self.lock_outputs(node, outputs, index + 1);
        }
    }
}
