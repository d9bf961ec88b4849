//! Network Error Types
//!
//! Failures from connection establishment and the socket cache.

use std::net::SocketAddr;

use thiserror::Error;

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The manager was stopped; no new sockets are handed out
    #[error("Socket manager is stopped")]
    Stopped,

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    /// Check if this is a retryable error. Transport failures are handled
    /// by invalidating the cached socket; the caller retries by asking for
    /// a socket again.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Connection { .. } => true,
            NetworkError::Io { .. } => true,
            NetworkError::Stopped => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            NetworkError::Connection { .. } => "connection",
            NetworkError::Stopped => "stopped",
            NetworkError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(error: std::io::Error) -> Self {
        NetworkError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        assert_eq!(NetworkError::connection("refused", None).category(), "connection");
        assert_eq!(NetworkError::Stopped.category(), "stopped");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NetworkError::connection("refused", None).is_retryable());
        assert!(!NetworkError::Stopped.is_retryable());
    }
}
