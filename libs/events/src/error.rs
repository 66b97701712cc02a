//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when decoding runtime events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The event line was empty.
    #[error("empty event message")]
    Empty,

    /// The event payload is missing a required field.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
