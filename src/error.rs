//! Error types for agent-relay

use thiserror::Error;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport connection failure (unreachable or misconfigured broker)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation attempted before `connect()` / `start()`
    #[error("Channel not connected; call connect() first")]
    NotConnected,

    /// Publish failure
    #[error("Failed to publish to channel '{channel}': {reason}")]
    Publish {
        channel: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to pattern '{pattern}': {reason}")]
    Subscribe {
        pattern: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure inside an agent turn (model stream, tool call, sentinel parse)
    ///
    /// Caught at the request-task boundary and surfaced to the user as a
    /// single `error` event with `done=true`.
    #[error("Agent turn failed: {0}")]
    Turn(String),

    /// Visualization judge failure
    ///
    /// Recovered locally by defaulting to "retry needed"; never surfaced.
    #[error("Judge evaluation failed: {0}")]
    Judge(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
