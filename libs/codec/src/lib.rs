//! # Codec - Message Envelope and Wire Framing
//!
//! ## Purpose
//!
//! Everything between "the runtime wants to send this" and "bytes on a
//! socket": the mutable [`Message`] envelope with its typed header map, the
//! [`BufferPool`] that backs wire buffers, length-prefixed frame assembly,
//! and the pluggable [`Serializer`] seam that keeps the header/body binary
//! grammar out of this crate.
//!
//! ## Architecture Role
//!
//! ```text
//! Runtime → [Message headers/body] → [Serializer] → [BufferPool segments] → Transport
//!    ↑             ↓                      ↓                 ↓
//! identities   header mutex         opaque bytes      pooled chunks
//! ```
//!
//! Received frames flow the other way: headers deserialize eagerly, bodies stay
//! as pooled byte segments until first access, then the segments go back to
//! the pool. Deserialize-once, release-once.

pub mod buffers;
pub mod error;
pub mod headers;
pub mod message;
pub mod placement;
pub mod serializer;

pub use buffers::BufferPool;
pub use error::{CodecError, Result};
pub use headers::{
    CorrelationId, Direction, HeaderValue, LifecycleTag, MessageCategory, MessageHeaders,
    RejectionKind, ResponseKind,
};
pub use message::Message;
pub use placement::PlacementResult;
pub use serializer::{BincodeSerializer, Serializer};
