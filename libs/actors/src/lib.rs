//! # Messaging Actors - Dedicated-Thread Workers
//!
//! ## Purpose
//!
//! The scheduling substrate of the messaging pipeline: blocking FIFO queues
//! and named agents that each own one dedicated OS thread. There is no
//! shared event loop; an agent blocks on its queue, drains work (optionally
//! batching consecutive same-destination messages), and applies a configured
//! fault policy when its work loop panics.
//!
//! ## Architecture Role
//!
//! ```text
//! Sender Pipeline → [RuntimeQueue] → [AsynchQueueAgent thread] → QueueProcessor → Transport
//!        ↑               ↓                    ↓
//!   queue_request    blocking take      same-destination batches
//! ```

pub mod agent;
pub mod error;
pub mod outgoing;
pub mod queue;
pub mod queue_agent;

pub use agent::{AgentState, AsynchAgent, CancellationToken, FaultBehavior};
pub use error::{AgentError, QueueError};
pub use outgoing::OutgoingMessage;
pub use queue::RuntimeQueue;
pub use queue_agent::{AsynchQueueAgent, QueueProcessor};
