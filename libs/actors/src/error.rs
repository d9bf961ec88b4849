//! Agent and queue error types.

use thiserror::Error;

/// Errors from [`RuntimeQueue`](crate::RuntimeQueue) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was completed; no more items may be added
    #[error("Queue is completed; additions are rejected")]
    AddingCompleted,

    /// The queue was completed and drained while a consumer waited
    #[error("Queue is completed and empty")]
    Drained,
}

/// Errors from agent lifecycle operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Start was called in a state that cannot transition to Running
    #[error("Agent {name} cannot start from state {state}")]
    InvalidStart { name: String, state: &'static str },

    /// The agent thread could not be spawned
    #[error("Failed to spawn thread for agent {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
