//! Codec Error Types
//!
//! Failures from frame assembly, header/body (de)serialization, and message
//! state transitions.

use thiserror::Error;

/// Main codec error type
#[derive(Error, Debug)]
pub enum CodecError {
    /// Header or body (de)serialization failed
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A received frame does not follow the framing grammar
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// A header required by the operation is missing
    #[error("Missing header: {header}")]
    MissingHeader { header: &'static str },

    /// An operation was applied to a message in the wrong state
    #[error("Invalid message state: {message}")]
    InvalidState { message: String },
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a malformed-frame error
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create a missing-header error
    pub fn missing_header(header: &'static str) -> Self {
        Self::MissingHeader { header }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CodecError::Serialization { .. } => "serialization",
            CodecError::MalformedFrame { .. } => "malformed_frame",
            CodecError::MissingHeader { .. } => "missing_header",
            CodecError::InvalidState { .. } => "invalid_state",
        }
    }
}

impl From<bincode::Error> for CodecError {
    fn from(error: bincode::Error) -> Self {
        CodecError::serialization_with_source("binary serialization failed", error)
    }
}
