//! Lazy pull-based dataflow engine with typed ports
//!
//! This library provides an in-process computation graph: nodes connected
//! by typed input/output ports, recomputed lazily on demand. Invalidation
//! propagates forward through `Modified` signals, update requests propagate
//! backward through `Update` signals, and every node tracks per-port dirty
//! flags so a pull recomputes exactly the stale parts of the graph.
//!
//! # Architecture
//!
//! - **Signal fabric**: typed slots and callbacks with invocation and
//!   tracking policies, connected pairwise through senders and receivers
//! - **Ports**: single inputs, growable multi-inputs, and outputs owning
//!   shared, mutex-carrying data cells
//! - **Nodes**: a port registry base plus dirty tracking and a recursive
//!   pull protocol with optional parallel fan-out over a process-wide
//!   worker-thread budget
//! - **Handles**: shared node ownership via [`Process`], auto-updating
//!   reads via [`Value`]
//!
//! # Example
//!
//! ```ignore
//! use pipeline::{Process, Value};
//!
//! let reader = Process::new(ImageReader::new("volume.tif"));
//! let smoother = Process::new(Smoother::new());
//! smoother.input.accept(&reader.output);
//!
//! let image: Value<Image> = Value::new(&smoother.output);
//! let width = image.get()?.width();
//! # Ok::<(), pipeline::PortError>(())
//! ```

pub mod runtime;
pub mod signals;

// Re-export the engine surface
pub use runtime::{
    AssignmentError, Data, DataRef, Input, InputCore, InputType, Locking, MultiInput,
    MultiInputCore, NodeCore, Output, OutputCore, PipelineError, PortError, Process, ProcessNode,
    SharedData, SimpleNode, Value, num_threads, set_num_threads,
};

// Re-export the signal fabric
pub use signals::{
    Callback, CallbackInvocation, Receiver, Sender, Signal, SignalKind, Slot, Slots, Tracking,
};
