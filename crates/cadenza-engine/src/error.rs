use crate::node::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine's public surface and by block processing.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A caller-supplied value failed validation before any processing.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the object's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A pull re-entered a node that is still producing its block.
    #[error("graph cycle detected at node {node} ({label})")]
    GraphCycle { node: NodeId, label: &'static str },

    /// The context or node was disposed before this call.
    #[error("already disposed")]
    Disposed,
}

impl EngineError {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }
}
