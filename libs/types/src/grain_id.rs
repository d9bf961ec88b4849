//! # GrainId - Logical Actor Identity
//!
//! A grain id names a logical actor independent of where (or whether) it is
//! currently activated. It wraps a [`UniqueKey`] and is canonicalized through
//! a process-wide interning cache: structurally equal ids share one `Arc`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::interner::Interner;
use crate::unique_key::{Category, UniqueKey};

static INTERNER: Lazy<Interner<UniqueKey, GrainId>> = Lazy::new(Interner::new);

/// Logical actor identity. Obtain instances through the factory functions,
/// which canonicalize through the intern cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrainId {
    key: UniqueKey,
}

impl GrainId {
    /// Canonicalize a key into the shared intern cache.
    pub fn intern(key: UniqueKey) -> Arc<GrainId> {
        INTERNER.find_or_create(key.clone(), || GrainId { key })
    }

    /// Fresh random grain id.
    pub fn new_id() -> Arc<GrainId> {
        Self::intern(UniqueKey::random())
    }

    /// Fresh random client grain id.
    pub fn new_client_id() -> Arc<GrainId> {
        // A freshly drawn guid with a legal category cannot fail to pack.
        let guid = Uuid::new_v4();
        match UniqueKey::new_key_from_guid(guid, Category::ClientGrain, 0, None) {
            Ok(key) => Self::intern(key),
            Err(_) => unreachable!("client grain keys always construct legally"),
        }
    }

    /// Grain id from a guid primary key.
    pub fn from_guid(guid: Uuid) -> Result<Arc<GrainId>> {
        Ok(Self::intern(UniqueKey::new_key_from_guid(
            guid,
            Category::Grain,
            0,
            None,
        )?))
    }

    /// Grain id from a guid primary key with an explicit type code and
    /// optional key extension.
    pub fn from_guid_typed(
        guid: Uuid,
        type_code: u32,
        key_ext: Option<String>,
    ) -> Result<Arc<GrainId>> {
        let category = if key_ext.is_some() {
            Category::KeyExtGrain
        } else {
            Category::Grain
        };
        Ok(Self::intern(UniqueKey::new_key_from_guid(
            guid, category, type_code, key_ext,
        )?))
    }

    /// Grain id from a long primary key.
    pub fn from_long(key: i64) -> Result<Arc<GrainId>> {
        Ok(Self::intern(UniqueKey::new_key_from_long(
            key,
            Category::Grain,
            0,
            None,
        )?))
    }

    /// Grain id from a long primary key with an explicit type code and
    /// optional key extension.
    pub fn from_long_typed(
        key: i64,
        type_code: u32,
        key_ext: Option<String>,
    ) -> Result<Arc<GrainId>> {
        let category = if key_ext.is_some() {
            Category::KeyExtGrain
        } else {
            Category::Grain
        };
        Ok(Self::intern(UniqueKey::new_key_from_long(
            key, category, type_code, key_ext,
        )?))
    }

    /// Well-known per-silo system target.
    pub fn system_target(system_id: u16, endpoint: Option<SocketAddr>) -> Arc<GrainId> {
        Self::intern(UniqueKey::new_system_target_key(system_id, endpoint))
    }

    pub fn key(&self) -> &UniqueKey {
        &self.key
    }

    pub fn category(&self) -> Category {
        self.key.category()
    }

    pub fn type_code(&self) -> u32 {
        self.key.type_code()
    }

    pub fn is_grain(&self) -> bool {
        matches!(
            self.key.category(),
            Category::Grain | Category::KeyExtGrain | Category::SystemGrain
        )
    }

    pub fn is_system_target(&self) -> bool {
        self.key.category() == Category::SystemTarget
    }

    pub fn is_client(&self) -> bool {
        matches!(
            self.key.category(),
            Category::ClientGrain | Category::ClientAddressableObject
        )
    }

    pub fn uniform_hash_code(&self) -> u32 {
        self.key.uniform_hash_code()
    }

    /// Bijective string form for logs and persistence.
    pub fn to_parsable_string(&self) -> String {
        self.key.to_hex_string()
    }

    /// Inverse of [`to_parsable_string`].
    ///
    /// [`to_parsable_string`]: GrainId::to_parsable_string
    pub fn from_parsable_string(input: &str) -> Result<Arc<GrainId>> {
        Ok(Self::intern(UniqueKey::parse(input)?))
    }

    /// Drop the intern cache. Teardown/test hook.
    pub fn flush_intern_cache() {
        INTERNER.clear();
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key.category() {
            Category::SystemTarget => {
                let id = self.key.primary_key_to_system_id().unwrap_or(0);
                write!(f, "*stg/{}/{:08x}", id, self.key.uniform_hash_code())
            }
            Category::ClientGrain | Category::ClientAddressableObject => {
                write!(f, "*cli/{:08x}", self.key.uniform_hash_code())
            }
            _ => write!(
                f,
                "*grn/{:X}/{:08x}",
                self.key.type_code(),
                self.key.uniform_hash_code()
            ),
        }
    }
}
