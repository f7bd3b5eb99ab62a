//! The dataflow engine: ports, nodes, and the pull update protocol

pub mod config;
pub mod data;
pub mod errors;
pub mod input;
pub mod inputs;
pub mod node;
pub mod output;
pub mod process;
pub mod simple;
pub mod value;

pub use config::{num_threads, set_num_threads};
pub use data::{Data, DataRef, SharedData};
pub use errors::{AssignmentError, PipelineError, PortError};
pub use input::{Input, InputCore};
pub use inputs::{MultiInput, MultiInputCore};
pub use node::{NodeCore, ProcessNode};
pub use output::{Output, OutputCore};
pub use process::Process;
pub use simple::{InputType, Locking, SimpleNode};
pub use value::Value;
