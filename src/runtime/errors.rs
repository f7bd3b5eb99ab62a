//! Error types for the runtime system

/// Payload type mismatch while assigning a port.
#[derive(Debug, Clone, thiserror::Error)]
#[error("payload of type {found} cannot be assigned to a port of type {expected}")]
pub struct AssignmentError {
    pub expected: &'static str,
    pub found: &'static str,
}

/// Error type for port lookup and access.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("not enough inputs: index {index} out of range ({size} registered)")]
    NotEnoughInputs { index: usize, size: usize },

    #[error("not enough outputs: index {index} out of range ({size} registered)")]
    NotEnoughOutputs { index: usize, size: usize },

    #[error("no such input: '{0}'")]
    NoSuchInput(String),

    #[error("no such output: '{0}'")]
    NoSuchOutput(String),

    #[error("port does not point to valid data")]
    NullPointer,
}

/// Umbrella error for node-level operations that can fail either at port
/// lookup or at assignment.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Port(#[from] PortError),
}
