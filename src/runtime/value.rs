//! Auto-updating value handles
//!
//! A [`Value`] is the user-facing way to read a result out of the graph:
//! it wraps a hidden single-input node wired to an output, and every read
//! pulls that input up to date first.
//!
//! ```ignore
//! let image: Value<Image> = Value::new(&reader.output);
//! let width = image.get()?.width();
//! ```

use std::sync::Arc;

use super::errors::{AssignmentError, PortError};
use super::data::DataRef;
use super::input::Input;
use super::node::{NodeCore, ProcessNode};
use super::output::{Output, OutputCore};
use super::process::Process;
use super::simple::{InputType, SimpleNode};

/// The hidden updater node behind a value handle. Its only job is to own
/// one input and pull it on demand; it produces nothing itself.
struct ValueUpdater<T: Send + Sync + 'static> {
    node: SimpleNode,
    data: Input<T>,
}

impl<T: Send + Sync + 'static> ValueUpdater<T> {
    fn new() -> Self {
        let node = SimpleNode::new("value");
        let data = Input::new();
        node.register_input(&data, "data", InputType::Required);
        Self { node, data }
    }
}

impl<T: Send + Sync + 'static> ProcessNode for ValueUpdater<T> {
    fn node(&self) -> &NodeCore {
        self.node.core()
    }
}

/// Auto-updating accessor for the value of an output.
///
/// Cloning shares the underlying updater, so clones observe the same
/// binding.
pub struct Value<T: Send + Sync + 'static> {
    updater: Process<ValueUpdater<T>>,
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value").finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Value<T> {
    /// Create a handle bound to a typed output.
    pub fn new(output: &Output<T>) -> Self {
        let value = Self::unbound();
        value.bind(output);
        value
    }

    /// Create a handle bound to a type-erased output.
    pub fn from_core(output: &Arc<OutputCore>) -> Result<Self, AssignmentError> {
        let value = Self::unbound();
        value.updater.data.core().accept_output(output)?;
        Ok(value)
    }

    fn unbound() -> Self {
        Self {
            updater: Process::new(ValueUpdater::new()),
        }
    }

    /// Rebind the handle to a different output.
    pub fn bind(&self, output: &Output<T>) {
        self.updater.data.accept(output);
    }

    /// Bring the producing chain up to date and return the current value.
    ///
    /// Fails with [`PortError::NullPointer`] when no value can be produced,
    /// e.g. the bound producer is missing a required input.
    pub fn get(&self) -> Result<DataRef<T>, PortError> {
        self.updater.node.update_inputs();
        self.updater.data.read()
    }
}

impl<T: Send + Sync + 'static> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            updater: self.updater.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        node: SimpleNode,
        output: Output<u64>,
        current: Mutex<u64>,
        runs: AtomicUsize,
    }

    impl Counter {
        fn new() -> Self {
            let node = SimpleNode::new("counter");
            let output = Output::new();
            node.register_output(&output, "count");
            Self {
                node,
                output,
                current: Mutex::new(0),
                runs: AtomicUsize::new(0),
            }
        }

        fn advance(&self) {
            *self.current.lock().unwrap() += 1;
            self.node.set_dirty(&self.output).unwrap();
        }
    }

    impl ProcessNode for Counter {
        fn node(&self) -> &NodeCore {
            self.node.core()
        }

        fn update_outputs(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.output.set(*self.current.lock().unwrap());
        }
    }

    #[test]
    fn value_pulls_on_access() {
        let counter = Process::new(Counter::new());
        let value = Value::new(&counter.output);

        assert_eq!(*value.get().unwrap(), 0);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

        // Reads without invalidation are cached.
        assert_eq!(*value.get().unwrap(), 0);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

        counter.advance();
        assert_eq!(*value.get().unwrap(), 1);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clones_share_the_binding() {
        let counter = Process::new(Counter::new());
        let value = Value::new(&counter.output);
        let clone = value.clone();

        counter.advance();
        assert_eq!(*clone.get().unwrap(), 1);
        assert_eq!(*value.get().unwrap(), 1);
        // The second read reused the pull of the first.
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rebind_follows_new_producer() {
        let first = Process::new(Counter::new());
        let second = Process::new(Counter::new());
        second.advance();
        second.advance();

        let value = Value::new(&first.output);
        assert_eq!(*value.get().unwrap(), 0);

        value.bind(&second.output);
        assert_eq!(*value.get().unwrap(), 2);
    }

    #[test]
    fn erased_binding_checks_payload_type() {
        let counter = Process::new(Counter::new());
        let err = Value::<String>::from_core(counter.output.core()).unwrap_err();
        assert_eq!(err.expected, std::any::type_name::<String>());
    }
}
