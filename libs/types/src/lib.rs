//! # Identity Types - Silo Runtime Addressing
//!
//! ## Purpose
//!
//! Canonical identity system for the silo runtime: 128-bit grain keys with
//! embedded category and type-code data, activation identifiers, and silo
//! addresses with restart-disambiguating generations. Every identity is
//! canonicalized through a process-wide interning cache so structurally equal
//! identities share one in-memory instance, making reference equality a valid
//! fast path across millions of messages.
//!
//! ## Architecture Role
//!
//! ```text
//! Caller Input → [Identity Construction] → Interning Cache → [Message Headers] → Transport
//!      ↑                  ↓                     ↓                  ↓
//!  Guid/long      UniqueKey packing       One Arc per key    Target/Sending
//!  endpoint       category + type code    process-wide       address triples
//! ```
//!
//! Identities flow into message headers (see the codec crate) and out to the
//! socket layer, which routes on `SiloAddress` endpoints.

pub mod activation_address;
pub mod activation_id;
pub mod error;
pub mod grain_id;
pub mod hashing;
pub mod interner;
pub mod silo_address;
pub mod unique_key;

pub use activation_address::ActivationAddress;
pub use activation_id::ActivationId;
pub use error::{IdentityError, Result};
pub use grain_id::GrainId;
pub use silo_address::SiloAddress;
pub use unique_key::{Category, UniqueKey};
