//! # Message - The Transport Envelope
//!
//! ## Purpose
//!
//! The mutable envelope every payload travels in: typed headers under a
//! per-message mutex, a body that is either an in-memory object or deferred
//! pooled byte segments, and the framing logic that turns the whole thing
//! into `[headerLen][bodyLen][header][body]` wire segments.
//!
//! ## Concurrency
//!
//! A message is owned by its creator until handed to the transport, after
//! which the sending pipeline and application code may touch headers from
//! different threads. All header access, including invalidation of the
//! derived target/sending address caches, happens under the header mutex.
//! Body access is deserialize-once, release-once: the first object access
//! decodes the deferred segments and returns them to the pool.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tracing::{debug, warn};

use config::MessagingConfiguration;
use types::{ActivationAddress, ActivationId, GrainId, SiloAddress};

use crate::buffers::BufferPool;
use crate::error::{CodecError, Result};
use crate::headers::{
    CorrelationId, Direction, HeaderValue, LifecycleTag, MessageCategory, MessageHeaders,
    RejectionKind, ResponseKind,
};
use crate::placement::PlacementResult;
use crate::serializer::Serializer;

/// Two little-endian i32 length prefixes
pub const FRAME_PREFIX_LEN: usize = 8;

pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

struct Inner {
    headers: MessageHeaders,
    // Derived caches, invalidated whenever a constituent header changes.
    target_address: Option<ActivationAddress>,
    sending_address: Option<ActivationAddress>,
}

enum BodyState {
    None,
    Object(Arc<dyn Any + Send + Sync>),
    Deferred(Vec<Vec<u8>>),
}

/// The transport envelope. See module docs.
pub struct Message {
    inner: Mutex<Inner>,
    body: Mutex<BodyState>,
}

impl Message {
    /// Fresh message with a new correlation id and a `Created` timestamp.
    pub fn new(category: MessageCategory, direction: Direction) -> Self {
        let mut headers = MessageHeaders {
            category: Some(category),
            direction: Some(direction),
            id: Some(CorrelationId::new()),
            ..Default::default()
        };
        headers.timestamps.push((LifecycleTag::Created, now_nanos()));
        Self {
            inner: Mutex::new(Inner {
                headers,
                target_address: None,
                sending_address: None,
            }),
            body: Mutex::new(BodyState::None),
        }
    }

    fn from_headers(headers: MessageHeaders, body: BodyState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                headers,
                target_address: None,
                sending_address: None,
            }),
            body: Mutex::new(body),
        }
    }

    /// Rebuild a message from a received header segment and pooled body
    /// segments. Headers deserialize eagerly and are canonicalized through
    /// the intern caches; the body stays deferred until first access.
    pub fn from_segments(
        header_bytes: &[u8],
        body_segments: Vec<Vec<u8>>,
        serializer: &dyn Serializer,
    ) -> Result<Self> {
        let mut headers = serializer.deserialize_headers(header_bytes)?;
        headers.canonicalize();
        headers
            .timestamps
            .push((LifecycleTag::DoneIncomingDeserialize, now_nanos()));
        let body = if body_segments.is_empty() {
            BodyState::None
        } else {
            BodyState::Deferred(body_segments)
        };
        Ok(Self::from_headers(headers, body))
    }

    /// Rebuild a message from one non-batched wire frame, copying the body
    /// into pooled segments.
    pub fn from_frame(
        frame: &[u8],
        pool: &BufferPool,
        serializer: &dyn Serializer,
    ) -> Result<Self> {
        let (header_bytes, body_bytes) = Self::split_frame(frame)?;
        let mut segments = pool.get_multi_buffer(body_bytes.len());
        let mut offset = 0;
        for segment in &mut segments {
            let len = segment.len();
            segment.copy_from_slice(&body_bytes[offset..offset + len]);
            offset += len;
        }
        Self::from_segments(header_bytes, segments, serializer)
    }

    /// Split a non-batched frame into its header and body byte ranges.
    pub fn split_frame(frame: &[u8]) -> Result<(&[u8], &[u8])> {
        if frame.len() < FRAME_PREFIX_LEN {
            return Err(CodecError::malformed_frame(format!(
                "frame too short for prefixes: {} bytes",
                frame.len()
            )));
        }
        let header_len = LittleEndian::read_i32(&frame[0..4]);
        let body_len = LittleEndian::read_i32(&frame[4..8]);
        if header_len < 0 || body_len < 0 {
            return Err(CodecError::malformed_frame("negative segment length"));
        }
        let header_len = header_len as usize;
        let body_len = body_len as usize;
        let expected = FRAME_PREFIX_LEN + header_len + body_len;
        if frame.len() < expected {
            return Err(CodecError::malformed_frame(format!(
                "frame truncated: {} bytes, prefixes claim {}",
                frame.len(),
                expected
            )));
        }
        let header = &frame[FRAME_PREFIX_LEN..FRAME_PREFIX_LEN + header_len];
        let body = &frame[FRAME_PREFIX_LEN + header_len..expected];
        Ok((header, body))
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Run a closure against the full header set under the header mutex.
    pub fn with_headers<R>(&self, f: impl FnOnce(&MessageHeaders) -> R) -> R {
        f(&self.inner.lock().headers)
    }

    // ---- simple header accessors ------------------------------------------

    pub fn category(&self) -> Option<MessageCategory> {
        self.with_inner(|i| i.headers.category)
    }

    pub fn direction(&self) -> Option<Direction> {
        self.with_inner(|i| i.headers.direction)
    }

    pub fn set_direction(&self, direction: Direction) {
        self.with_inner(|i| i.headers.direction = Some(direction));
    }

    pub fn result(&self) -> Option<ResponseKind> {
        self.with_inner(|i| i.headers.result)
    }

    pub fn set_result(&self, result: ResponseKind) {
        self.with_inner(|i| i.headers.result = Some(result));
    }

    pub fn id(&self) -> Option<CorrelationId> {
        self.with_inner(|i| i.headers.id)
    }

    pub fn set_id(&self, id: CorrelationId) {
        self.with_inner(|i| i.headers.id = Some(id));
    }

    pub fn is_read_only(&self) -> bool {
        self.with_inner(|i| i.headers.is_read_only)
    }

    pub fn set_read_only(&self, value: bool) {
        self.with_inner(|i| i.headers.is_read_only = value);
    }

    pub fn is_always_interleave(&self) -> bool {
        self.with_inner(|i| i.headers.is_always_interleave)
    }

    pub fn set_always_interleave(&self, value: bool) {
        self.with_inner(|i| i.headers.is_always_interleave = value);
    }

    pub fn is_unordered(&self) -> bool {
        self.with_inner(|i| i.headers.is_unordered)
    }

    pub fn set_unordered(&self, value: bool) {
        self.with_inner(|i| i.headers.is_unordered = value);
    }

    pub fn is_new_placement(&self) -> bool {
        self.with_inner(|i| i.headers.is_new_placement)
    }

    pub fn debug_context(&self) -> Option<String> {
        self.with_inner(|i| i.headers.debug_context.clone())
    }

    pub fn set_debug_context(&self, context: impl Into<String>) {
        self.with_inner(|i| i.headers.debug_context = Some(context.into()));
    }

    pub fn rejection_type(&self) -> Option<RejectionKind> {
        self.with_inner(|i| i.headers.rejection_type)
    }

    pub fn rejection_info(&self) -> Option<String> {
        self.with_inner(|i| i.headers.rejection_info.clone())
    }

    pub fn interface_id(&self) -> Option<u32> {
        self.with_inner(|i| i.headers.interface_id)
    }

    pub fn set_interface_id(&self, id: u32) {
        self.with_inner(|i| i.headers.interface_id = Some(id));
    }

    pub fn method_id(&self) -> Option<u32> {
        self.with_inner(|i| i.headers.method_id)
    }

    pub fn set_method_id(&self, id: u32) {
        self.with_inner(|i| i.headers.method_id = Some(id));
    }

    // ---- addressing -------------------------------------------------------

    pub fn sending_silo(&self) -> Option<Arc<SiloAddress>> {
        self.with_inner(|i| i.headers.sending_silo.clone())
    }

    pub fn set_sending_silo(&self, silo: Arc<SiloAddress>) {
        self.with_inner(|i| {
            i.headers.sending_silo = Some(silo);
            i.sending_address = None;
        });
    }

    pub fn sending_grain(&self) -> Option<Arc<GrainId>> {
        self.with_inner(|i| i.headers.sending_grain.clone())
    }

    pub fn set_sending_grain(&self, grain: Arc<GrainId>) {
        self.with_inner(|i| {
            i.headers.sending_grain = Some(grain);
            i.sending_address = None;
        });
    }

    pub fn sending_activation(&self) -> Option<Arc<ActivationId>> {
        self.with_inner(|i| i.headers.sending_activation.clone())
    }

    pub fn set_sending_activation(&self, activation: Arc<ActivationId>) {
        self.with_inner(|i| {
            i.headers.sending_activation = Some(activation);
            i.sending_address = None;
        });
    }

    pub fn target_silo(&self) -> Option<Arc<SiloAddress>> {
        self.with_inner(|i| i.headers.target_silo.clone())
    }

    pub fn set_target_silo(&self, silo: Arc<SiloAddress>) {
        self.with_inner(|i| {
            i.headers.target_silo = Some(silo);
            i.target_address = None;
        });
    }

    pub fn target_grain(&self) -> Option<Arc<GrainId>> {
        self.with_inner(|i| i.headers.target_grain.clone())
    }

    pub fn set_target_grain(&self, grain: Arc<GrainId>) {
        self.with_inner(|i| {
            i.headers.target_grain = Some(grain);
            i.target_address = None;
        });
    }

    pub fn target_activation(&self) -> Option<Arc<ActivationId>> {
        self.with_inner(|i| i.headers.target_activation.clone())
    }

    pub fn set_target_activation(&self, activation: Arc<ActivationId>) {
        self.with_inner(|i| {
            i.headers.target_activation = Some(activation);
            i.target_address = None;
        });
    }

    /// Derived target triple, built on demand and cached until a target
    /// header changes.
    pub fn target_address(&self) -> Option<ActivationAddress> {
        self.with_inner(|i| {
            if i.target_address.is_none() {
                let h = &i.headers;
                if h.target_silo.is_some()
                    || h.target_grain.is_some()
                    || h.target_activation.is_some()
                {
                    i.target_address = Some(ActivationAddress::from_parts(
                        h.target_silo.clone(),
                        h.target_grain.clone(),
                        h.target_activation.clone(),
                    ));
                }
            }
            i.target_address.clone()
        })
    }

    pub fn set_target_address(&self, address: &ActivationAddress) {
        self.with_inner(|i| {
            i.headers.target_silo = address.silo().cloned();
            i.headers.target_grain = address.grain().cloned();
            i.headers.target_activation = address.activation().cloned();
            i.target_address = Some(address.clone());
        });
    }

    /// Derived sending triple, cached like [`target_address`].
    ///
    /// [`target_address`]: Message::target_address
    pub fn sending_address(&self) -> Option<ActivationAddress> {
        self.with_inner(|i| {
            if i.sending_address.is_none() {
                let h = &i.headers;
                if h.sending_silo.is_some()
                    || h.sending_grain.is_some()
                    || h.sending_activation.is_some()
                {
                    i.sending_address = Some(ActivationAddress::from_parts(
                        h.sending_silo.clone(),
                        h.sending_grain.clone(),
                        h.sending_activation.clone(),
                    ));
                }
            }
            i.sending_address.clone()
        })
    }

    pub fn set_sending_address(&self, address: &ActivationAddress) {
        self.with_inner(|i| {
            i.headers.sending_silo = address.silo().cloned();
            i.headers.sending_grain = address.grain().cloned();
            i.headers.sending_activation = address.activation().cloned();
            i.sending_address = Some(address.clone());
        });
    }

    /// Stamp a placement decision onto the target headers. A new placement
    /// carries its strategy and grain type; locating an existing activation
    /// clears both.
    pub fn set_target_placement(&self, placement: &PlacementResult) {
        self.with_inner(|i| {
            i.headers.target_silo = Some(placement.silo().clone());
            i.headers.target_activation = Some(placement.activation().clone());
            i.headers.is_new_placement = placement.is_new_placement();
            if placement.is_new_placement() {
                i.headers.placement_strategy =
                    placement.placement_strategy().map(|s| s.to_string());
                i.headers.grain_type = placement.grain_type().map(|s| s.to_string());
            } else {
                i.headers.placement_strategy = None;
                i.headers.grain_type = None;
            }
            i.target_address = None;
        });
    }

    /// Batching key: same concrete target silo.
    pub fn is_same_destination(&self, other: &Message) -> bool {
        match (self.target_silo(), other.target_silo()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Duplicate detection: same sending silo and correlation id.
    pub fn is_duplicate(&self, other: &Message) -> bool {
        match (
            self.sending_silo(),
            other.sending_silo(),
            self.id(),
            other.id(),
        ) {
            (Some(silo_a), Some(silo_b), Some(id_a), Some(id_b)) => {
                silo_a == silo_b && id_a == id_b
            }
            _ => false,
        }
    }

    // ---- resend / forward / expiration ------------------------------------

    pub fn resend_count(&self) -> u32 {
        self.with_inner(|i| i.headers.resend_count)
    }

    pub fn increment_resend_count(&self) {
        self.with_inner(|i| i.headers.resend_count += 1);
    }

    pub fn may_resend(&self, config: &MessagingConfiguration) -> bool {
        self.resend_count() < config.max_resend_count
    }

    pub fn forward_count(&self) -> u32 {
        self.with_inner(|i| i.headers.forward_count)
    }

    pub fn increment_forward_count(&self) {
        self.with_inner(|i| i.headers.forward_count += 1);
    }

    pub fn may_forward(&self, config: &MessagingConfiguration) -> bool {
        self.forward_count() < config.max_forward_count
    }

    pub fn set_expiration(&self, time_to_live: Duration) {
        let deadline = now_nanos().saturating_add(time_to_live.as_nanos() as u64);
        self.with_inner(|i| i.headers.expiration = Some(deadline));
    }

    pub fn expiration(&self) -> Option<u64> {
        self.with_inner(|i| i.headers.expiration)
    }

    /// Whether expiration applies to this message at all. One-way messages
    /// and system traffic are never expired.
    pub fn is_expirable_message(&self, config: &MessagingConfiguration) -> bool {
        if !config.drop_expired_messages {
            return false;
        }
        if self.direction() == Some(Direction::OneWay) {
            return false;
        }
        match self.target_grain() {
            Some(grain) => {
                grain.category() != types::Category::SystemTarget
                    && grain.category() != types::Category::SystemGrain
            }
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expiration() {
            Some(deadline) => now_nanos() > deadline,
            None => false,
        }
    }

    /// Drop an expired message: log it and return any deferred body buffers
    /// to the pool. The message is not retried by this layer.
    pub fn drop_expired(&self, pool: &BufferPool) {
        warn!(
            id = ?self.id(),
            target = ?self.target_silo().map(|s| s.to_parsable_string()),
            "dropping expired message"
        );
        self.release_body_buffers(pool);
    }

    // ---- timestamps -------------------------------------------------------

    pub fn add_timestamp(&self, tag: LifecycleTag) {
        let now = now_nanos();
        self.with_inner(|i| i.headers.timestamps.push((tag, now)));
    }

    pub fn timestamps(&self) -> Vec<(LifecycleTag, u64)> {
        self.with_inner(|i| i.headers.timestamps.clone())
    }

    // ---- application headers ----------------------------------------------

    pub fn set_application_header(&self, name: &str, value: HeaderValue) {
        let key = MessageHeaders::application_key(name);
        self.with_inner(|i| {
            i.headers.application.insert(key, value);
        });
    }

    pub fn application_header(&self, name: &str) -> Option<HeaderValue> {
        let key = MessageHeaders::application_key(name);
        self.with_inner(|i| i.headers.application.get(&key).cloned())
    }

    pub fn remove_application_header(&self, name: &str) {
        let key = MessageHeaders::application_key(name);
        self.with_inner(|i| {
            i.headers.application.remove(&key);
        });
    }

    // ---- cache invalidation -----------------------------------------------

    /// Tell the receiver to purge a stale activation address from its
    /// directory cache.
    pub fn add_to_cache_invalidation_header(&self, address: ActivationAddress) {
        self.with_inner(|i| i.headers.cache_invalidation.push(address));
    }

    pub fn cache_invalidation_header(&self) -> Vec<ActivationAddress> {
        self.with_inner(|i| i.headers.cache_invalidation.clone())
    }

    // ---- response derivation ----------------------------------------------

    /// Derive the response envelope for this request: swaps the sending and
    /// target triples, copies the correlation id and the selected headers,
    /// and stamps a `CreateResponse` lifecycle tag.
    pub fn create_response_message(&self) -> Message {
        let response = self.with_inner(|i| {
            let h = &i.headers;
            let mut headers = MessageHeaders {
                category: h.category,
                direction: Some(Direction::Response),
                id: h.id,
                is_read_only: h.is_read_only,
                is_always_interleave: h.is_always_interleave,
                target_silo: h.sending_silo.clone(),
                target_grain: h.sending_grain.clone(),
                target_activation: h.sending_activation.clone(),
                sending_silo: h.target_silo.clone(),
                sending_grain: h.target_grain.clone(),
                sending_activation: h.target_activation.clone(),
                debug_context: h.debug_context.clone(),
                cache_invalidation: h.cache_invalidation.clone(),
                expiration: h.expiration,
                timestamps: h.timestamps.clone(),
                ..Default::default()
            };
            headers
                .timestamps
                .push((LifecycleTag::CreateResponse, now_nanos()));
            Message::from_headers(headers, BodyState::None)
        });
        response
    }

    /// Derive a rejection response carrying the rejection kind and reason as
    /// ordinary data.
    pub fn create_rejection_response(
        &self,
        kind: RejectionKind,
        info: impl Into<String>,
    ) -> Message {
        let info = info.into();
        debug!(id = ?self.id(), ?kind, info = %info, "creating rejection response");
        let response = self.create_response_message();
        response.set_result(ResponseKind::Rejection);
        response.with_inner_set_rejection(kind, info);
        response
    }

    fn with_inner_set_rejection(&self, kind: RejectionKind, info: String) {
        self.with_inner(|i| {
            i.headers.rejection_type = Some(kind);
            i.headers.rejection_info = Some(info);
        });
    }

    // ---- body -------------------------------------------------------------

    pub fn set_body_object(&self, body: Box<dyn Any + Send + Sync>) {
        *self.body.lock() = BodyState::Object(Arc::from(body));
    }

    pub fn has_body(&self) -> bool {
        !matches!(*self.body.lock(), BodyState::None)
    }

    /// The body object, deserializing deferred segments on first access and
    /// releasing them to the pool. Subsequent calls return the cached
    /// object; the segments are released exactly once.
    pub fn body_object(
        &self,
        serializer: &dyn Serializer,
        pool: &BufferPool,
    ) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let mut state = self.body.lock();
        match &*state {
            BodyState::None => Ok(None),
            BodyState::Object(obj) => Ok(Some(obj.clone())),
            BodyState::Deferred(_) => {
                let segments = match std::mem::replace(&mut *state, BodyState::None) {
                    BodyState::Deferred(segments) => segments,
                    _ => unreachable!(),
                };
                let bytes: Vec<u8> = segments.concat();
                let object: Arc<dyn Any + Send + Sync> =
                    Arc::from(serializer.deserialize_body(&bytes)?);
                pool.release_multi(segments);
                *state = BodyState::Object(object.clone());
                Ok(Some(object))
            }
        }
    }

    /// Return deferred body segments to the pool without deserializing.
    pub fn release_body_buffers(&self, pool: &BufferPool) {
        let mut state = self.body.lock();
        if let BodyState::Deferred(_) = &*state {
            if let BodyState::Deferred(segments) =
                std::mem::replace(&mut *state, BodyState::None)
            {
                pool.release_multi(segments);
            }
        }
    }

    // ---- framing ----------------------------------------------------------

    /// Serialize into pooled segments with the two length prefixes.
    pub fn serialize(
        &self,
        pool: &BufferPool,
        serializer: &dyn Serializer,
        large_message_threshold: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.serialize_inner(pool, serializer, large_message_threshold, true)
    }

    /// Serialize without the length prefixes; the outer batch frame supplies
    /// total length.
    pub fn serialize_for_batching(
        &self,
        pool: &BufferPool,
        serializer: &dyn Serializer,
        large_message_threshold: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.serialize_inner(pool, serializer, large_message_threshold, false)
    }

    fn serialize_inner(
        &self,
        pool: &BufferPool,
        serializer: &dyn Serializer,
        large_message_threshold: usize,
        with_prefix: bool,
    ) -> Result<Vec<Vec<u8>>> {
        self.add_timestamp(LifecycleTag::StartOutgoingSerialize);
        let header_bytes = self.with_headers(|h| serializer.serialize_headers(h))?;

        let body_bytes = {
            let state = self.body.lock();
            match &*state {
                BodyState::None => Vec::new(),
                BodyState::Object(obj) => serializer.serialize_body(obj.as_ref())?,
                BodyState::Deferred(segments) => segments.concat(),
            }
        };

        let prefix_len = if with_prefix { FRAME_PREFIX_LEN } else { 0 };
        let total = prefix_len + header_bytes.len() + body_bytes.len();
        if total > large_message_threshold {
            warn!(
                total_bytes = total,
                header_bytes = header_bytes.len(),
                id = ?self.id(),
                "serializing large message"
            );
        }

        let mut frame = Vec::with_capacity(total);
        if with_prefix {
            let mut prefix = [0u8; FRAME_PREFIX_LEN];
            LittleEndian::write_i32(&mut prefix[0..4], header_bytes.len() as i32);
            LittleEndian::write_i32(&mut prefix[4..8], body_bytes.len() as i32);
            frame.extend_from_slice(&prefix);
        }
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(&body_bytes);

        let mut segments = pool.get_multi_buffer(total);
        let mut offset = 0;
        for segment in &mut segments {
            let len = segment.len();
            segment.copy_from_slice(&frame[offset..offset + len]);
            offset += len;
        }
        self.add_timestamp(LifecycleTag::DoneOutgoingSerialize);
        Ok(segments)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let body = match &*self.body.lock() {
            BodyState::None => "none",
            BodyState::Object(_) => "object",
            BodyState::Deferred(_) => "deferred",
        };
        f.debug_struct("Message")
            .field("headers", &inner.headers)
            .field("body", &body)
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (direction, id, result) = self.with_inner(|i| {
            (i.headers.direction, i.headers.id, i.headers.result)
        });
        write!(f, "{:?}", direction)?;
        if let Some(result) = result {
            write!(f, "/{:?}", result)?;
        }
        if let Some(id) = id {
            write!(f, " {}", id)?;
        }
        Ok(())
    }
}
