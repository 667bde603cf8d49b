//! Error types for a3s-agent-stream

use thiserror::Error;

/// Errors that can occur while streaming agent turns
#[derive(Debug, Error)]
pub enum StreamError {
    /// Execution engine failed to start a turn or failed mid-stream
    #[error("Engine error: {0}")]
    Engine(String),

    /// A turn is already running for this session
    #[error("Session '{0}' already has an active turn")]
    SessionBusy(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Observer write failure
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A human decision that the approval request did not allow
    #[error("Invalid decision for action '{action}': {reason}")]
    InvalidDecision {
        action: String,
        reason: String,
    },
}

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
