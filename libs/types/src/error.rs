//! Identity Error Types
//!
//! Failures from key construction, shape-checked accessors, and string or
//! byte-form parsing.

use thiserror::Error;

/// Errors raised while constructing or inspecting identity values
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Factory arguments violate a key-shape rule
    #[error("Invalid key construction: {message}")]
    InvalidKey { message: String },

    /// An accessor was called against a key whose shape does not match
    #[error("Invalid key access: {message}")]
    InvalidAccess { message: String },

    /// Malformed byte buffer
    #[error("Malformed key bytes: {message}")]
    MalformedBytes { message: String },

    /// Malformed string form
    #[error("Parse error: {message} (input: {input:?})")]
    Parse { message: String, input: String },
}

/// Result type alias for identity operations
pub type Result<T> = std::result::Result<T, IdentityError>;

impl IdentityError {
    /// Create an invalid-construction error
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create an invalid-access error
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess {
            message: message.into(),
        }
    }

    /// Create a malformed-bytes error
    pub fn malformed_bytes(message: impl Into<String>) -> Self {
        Self::MalformedBytes {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            input: input.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            IdentityError::InvalidKey { .. } => "invalid_key",
            IdentityError::InvalidAccess { .. } => "invalid_access",
            IdentityError::MalformedBytes { .. } => "malformed_bytes",
            IdentityError::Parse { .. } => "parse",
        }
    }
}
