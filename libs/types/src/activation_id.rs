//! # ActivationId - Physical Activation Identity
//!
//! One in-memory instance of a grain. Ordinary activations draw a fresh
//! random key; system-target activations are derived deterministically from
//! the (grain, silo) pair so every silo computes the same activation id
//! without coordination.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grain_id::GrainId;
use crate::hashing;
use crate::interner::Interner;
use crate::silo_address::SiloAddress;
use crate::unique_key::{Category, UniqueKey};

static INTERNER: Lazy<Interner<UniqueKey, ActivationId>> = Lazy::new(Interner::new);

/// Physical activation identity wrapping a [`UniqueKey`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivationId {
    key: UniqueKey,
}

impl ActivationId {
    /// Canonicalize a key into the shared intern cache.
    pub fn intern(key: UniqueKey) -> Arc<ActivationId> {
        INTERNER.find_or_create(key.clone(), || ActivationId { key })
    }

    /// Fresh random activation id.
    pub fn new_id() -> Arc<ActivationId> {
        Self::intern(UniqueKey::random())
    }

    /// Deterministic activation for a system target on a given silo. Every
    /// caller computes the same id for the same (grain, silo) pair.
    pub fn get_system_activation(
        grain: &GrainId,
        silo: &SiloAddress,
    ) -> Result<Arc<ActivationId>> {
        let mut seed = grain.key().to_bytes();
        seed.extend_from_slice(silo.to_parsable_string().as_bytes());
        let lo = hashing::jenkins_hash(&seed);
        seed.push(0xA5);
        let hi = hashing::jenkins_hash(&seed);
        let packed = ((hi as u64) << 32) | lo as u64;
        let key = UniqueKey::new_key_from_long(packed as i64, Category::Grain, 0, None)?;
        Ok(Self::intern(key))
    }

    pub fn key(&self) -> &UniqueKey {
        &self.key
    }

    /// Drop the intern cache. Teardown/test hook.
    pub fn flush_intern_cache() {
        INTERNER.clear();
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:08x}", self.key.uniform_hash_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ids_are_distinct() {
        let a = ActivationId::new_id();
        let b = ActivationId::new_id();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_system_activation_is_deterministic() {
        let grain = GrainId::system_target(4, None);
        let silo = SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 1);
        let a = ActivationId::get_system_activation(&grain, &silo).unwrap();
        let b = ActivationId::get_system_activation(&grain, &silo).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other_silo = SiloAddress::new("10.0.0.2:11111".parse().unwrap(), 1);
        let c = ActivationId::get_system_activation(&grain, &other_silo).unwrap();
        assert_ne!(a.key(), c.key());
    }
}
