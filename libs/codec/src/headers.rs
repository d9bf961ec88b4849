//! # Message Headers
//!
//! The typed header set carried by every message, plus the small enums that
//! classify messages on the wire. Runtime-defined headers are named struct
//! fields; application-defined headers go into an overflow map keyed by
//! `!`-prefixed names so they can never collide with runtime headers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use types::{ActivationAddress, ActivationId, GrainId, SiloAddress};

/// Coarse message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    Ping,
    System,
    Application,
}

/// Request/response direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Request,
    Response,
    OneWay,
}

/// Outcome class carried on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    Success,
    Error,
    Rejection,
}

/// Why a request was rejected. Travels on the wire as ordinary data so the
/// caller can decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionKind {
    /// Retry immediately makes sense
    Transient,
    /// Retry later may succeed
    FutureTransient,
    /// The same correlation id was already seen
    DuplicateRequest,
    /// Do not retry
    Unrecoverable,
    /// The gateway is shedding load
    GatewayTooBusy,
}

/// Lifecycle markers appended to a message as it moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleTag {
    Created,
    EnqueueOutgoing,
    StartOutgoingSerialize,
    DoneOutgoingSerialize,
    SendOutgoing,
    ReceiveIncoming,
    StartIncomingDeserialize,
    DoneIncomingDeserialize,
    EnqueueIncoming,
    DequeueIncoming,
    InvokeIncoming,
    CreateResponse,
    EnqueueResponse,
    DequeueResponse,
}

/// Correlates a response to its request. Unique within the issuing process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CorrelationId(u64);

static NEXT_CORRELATION: AtomicU64 = AtomicU64::new(1);

impl CorrelationId {
    pub fn new() -> Self {
        Self(NEXT_CORRELATION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value of an application-defined header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<HeaderValue>),
}

/// Prefix that namespaces application headers away from runtime headers.
pub const APPLICATION_HEADER_PREFIX: char = '!';

/// The full header set of one message. Always accessed through the owning
/// [`Message`](crate::Message), which guards it with the per-message mutex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub category: Option<MessageCategory>,
    pub direction: Option<Direction>,
    pub result: Option<ResponseKind>,
    pub id: Option<CorrelationId>,

    pub resend_count: u32,
    pub forward_count: u32,

    pub sending_silo: Option<Arc<SiloAddress>>,
    pub sending_grain: Option<Arc<GrainId>>,
    pub sending_activation: Option<Arc<ActivationId>>,
    pub target_silo: Option<Arc<SiloAddress>>,
    pub target_grain: Option<Arc<GrainId>>,
    pub target_activation: Option<Arc<ActivationId>>,

    pub is_read_only: bool,
    pub is_always_interleave: bool,
    pub is_unordered: bool,
    pub is_new_placement: bool,

    /// Absolute expiration instant, unix nanoseconds
    pub expiration: Option<u64>,

    pub rejection_type: Option<RejectionKind>,
    pub rejection_info: Option<String>,
    pub debug_context: Option<String>,

    pub interface_id: Option<u32>,
    pub method_id: Option<u32>,

    pub placement_strategy: Option<String>,
    pub grain_type: Option<String>,

    /// Activation addresses the receiver must purge from its directory cache
    pub cache_invalidation: Vec<ActivationAddress>,

    /// Lifecycle markers with unix-nanosecond capture times
    pub timestamps: Vec<(LifecycleTag, u64)>,

    /// Application headers, keyed by `!`-prefixed names
    pub application: BTreeMap<String, HeaderValue>,
}

impl MessageHeaders {
    /// Replace wire-decoded identities with their canonical interned
    /// instances so reference equality holds for received messages too.
    pub fn canonicalize(&mut self) {
        if let Some(grain) = self.sending_grain.take() {
            self.sending_grain = Some(GrainId::intern(grain.key().clone()));
        }
        if let Some(grain) = self.target_grain.take() {
            self.target_grain = Some(GrainId::intern(grain.key().clone()));
        }
        if let Some(act) = self.sending_activation.take() {
            self.sending_activation = Some(ActivationId::intern(act.key().clone()));
        }
        if let Some(act) = self.target_activation.take() {
            self.target_activation = Some(ActivationId::intern(act.key().clone()));
        }
        if let Some(silo) = self.sending_silo.take() {
            self.sending_silo = Some(SiloAddress::new(silo.endpoint(), silo.generation()));
        }
        if let Some(silo) = self.target_silo.take() {
            self.target_silo = Some(SiloAddress::new(silo.endpoint(), silo.generation()));
        }
    }

    /// Namespaced key for an application header.
    pub fn application_key(name: &str) -> String {
        format!("{}{}", APPLICATION_HEADER_PREFIX, name)
    }
}
