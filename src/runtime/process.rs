//! Shared-ownership wrapper for process nodes
//!
//! Nodes are always accessed through shared handles. Wrapping a node in a
//! [`Process`] installs the weak self-handle on the node base, which is
//! what lets ports and callbacks upgrade back to the owning node, and
//! records the node as producer and dependency of its outputs.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use super::node::ProcessNode;

/// Shared handle to a process node.
///
/// Derefs to the node, so ports and node-specific methods stay reachable:
///
/// ```ignore
/// let doubler = Process::new(Doubler::new());
/// consumer.input.accept(&doubler.output);
/// ```
pub struct Process<N: ProcessNode> {
    inner: Arc<N>,
}

impl<N: ProcessNode> Process<N> {
    /// Wrap a node into a shared handle and install its self-handle.
    ///
    /// Register all ports before wrapping: outputs registered afterwards
    /// pick up the producer reference lazily on the next registration, but
    /// the usual pattern is construct, register, wrap.
    pub fn new(node: N) -> Self {
        let inner = Arc::new(node);
        let me: Weak<dyn ProcessNode> = {
            let weak: Weak<N> = Arc::downgrade(&inner);
            weak
        };
        inner.node().set_self_handle(me);
        Self { inner }
    }

    /// The node as a type-erased shared handle.
    pub fn handle(&self) -> Arc<dyn ProcessNode> {
        self.inner.clone()
    }

    /// The node as a typed shared handle.
    pub fn shared(&self) -> Arc<N> {
        Arc::clone(&self.inner)
    }
}

impl<N: ProcessNode> Deref for Process<N> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.inner
    }
}

impl<N: ProcessNode> Clone for Process<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
