//! # Messaging Configuration
//!
//! Read-only tuning inputs for the messaging substrate: buffer pool sizing,
//! resend/forward maxima, expiration policy, batching, and socket cache
//! limits. Loaded from TOML with every field defaulted, so an empty file (or
//! no file) yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tuning values consumed by the messaging core. All durations are
/// milliseconds in the file form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfiguration {
    /// Size of every pooled buffer, in bytes
    pub buffer_pool_buffer_size: usize,
    /// Maximum buffers retained by the pool; 0 means unbounded
    pub buffer_pool_max_size: usize,
    /// Buffers allocated into the pool at construction
    pub buffer_pool_preallocation_size: usize,

    /// Maximum times a message may be resent
    pub max_resend_count: u32,
    /// Maximum times a message may be forwarded to a new activation
    pub max_forward_count: u32,

    /// Whether expired messages are dropped rather than delivered
    pub drop_expired_messages: bool,
    /// Request expiration window, milliseconds
    pub response_timeout_millis: u64,

    /// Whether outbound agents group consecutive same-destination messages
    pub use_message_batching: bool,
    /// Maximum messages per batch
    pub max_message_batching_size: usize,

    /// Maximum cached outbound sockets
    pub max_sockets: usize,
    /// Maximum age of a cached socket before it is refreshed, milliseconds
    pub max_socket_age_millis: u64,

    /// Outbound frames above this size are logged as large messages
    pub large_message_size_threshold: usize,
}

impl Default for MessagingConfiguration {
    fn default() -> Self {
        Self {
            buffer_pool_buffer_size: 4096,
            buffer_pool_max_size: 10_000,
            buffer_pool_preallocation_size: 250,
            max_resend_count: 0,
            max_forward_count: 2,
            drop_expired_messages: true,
            response_timeout_millis: 30_000,
            use_message_batching: false,
            max_message_batching_size: 100,
            max_sockets: 200,
            max_socket_age_millis: 600_000,
            large_message_size_threshold: 85_000,
        }
    }
}

impl MessagingConfiguration {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        debug!(path = %path.display(), "loaded messaging configuration");
        Ok(config)
    }

    /// Parse from a TOML string. Missing fields take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_millis)
    }

    pub fn max_socket_age(&self) -> Duration {
        Duration::from_millis(self.max_socket_age_millis)
    }
}
