//! # Serializer Seam
//!
//! The messaging core treats header and body bytes as opaque: the binary
//! grammar belongs to a collaborator behind the [`Serializer`] trait. The
//! bincode implementation here is the default wiring and the one the tests
//! exercise; bodies it can handle are raw `Vec<u8>` payloads.

use std::any::Any;

use crate::error::{CodecError, Result};
use crate::headers::MessageHeaders;

/// Pluggable header/body codec.
pub trait Serializer: Send + Sync {
    fn serialize_headers(&self, headers: &MessageHeaders) -> Result<Vec<u8>>;
    fn deserialize_headers(&self, bytes: &[u8]) -> Result<MessageHeaders>;
    fn serialize_body(&self, body: &(dyn Any + Send + Sync)) -> Result<Vec<u8>>;
    fn deserialize_body(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send + Sync>>;
}

/// Default serializer: bincode headers, pass-through `Vec<u8>` bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize_headers(&self, headers: &MessageHeaders) -> Result<Vec<u8>> {
        Ok(bincode::serialize(headers)?)
    }

    fn deserialize_headers(&self, bytes: &[u8]) -> Result<MessageHeaders> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn serialize_body(&self, body: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
        body.downcast_ref::<Vec<u8>>()
            .cloned()
            .ok_or_else(|| CodecError::serialization("bincode serializer only handles Vec<u8> bodies"))
    }

    fn deserialize_body(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send + Sync>> {
        Ok(Box::new(bytes.to_vec()))
    }
}
