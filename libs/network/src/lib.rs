//! # Network - Outbound Socket Cache
//!
//! ## Purpose
//!
//! The outbound edge of the messaging substrate: a generic generation-based
//! LRU cache and its specialization to one live socket per destination
//! silo. Sockets are prepped for immediate-close semantics (linger zero,
//! no-delay), announced with a fixed connection preamble, and watched for
//! peer closure by a dangling one-byte receive.
//!
//! ## Architecture Role
//!
//! ```text
//! Queue Agent → [SocketManager.get_sending_socket] → cached TcpStream → peer silo
//!                        ↓                 ↑
//!                  [Lru eviction]    watcher thread invalidates on close
//! ```

pub mod error;
pub mod lru;
pub mod socket_manager;

pub use error::{NetworkError, Result};
pub use lru::Lru;
pub use socket_manager::{Connection, SocketManager};
