//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("{kind} ID cannot be empty")]
    Empty { kind: &'static str },

    /// The ID contains whitespace or a control character.
    #[error("invalid character {ch:?} in {kind} ID")]
    InvalidCharacter { kind: &'static str, ch: char },

    /// The ID has a digest algorithm prefix but no digest.
    #[error("{kind} ID '{value}' has an empty digest")]
    EmptyDigest { kind: &'static str, value: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// Returns the kind of identifier that failed to parse.
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind }
            | IdError::InvalidCharacter { kind, .. }
            | IdError::EmptyDigest { kind, .. } => kind,
        }
    }
}
