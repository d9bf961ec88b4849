//! # SiloAddress - Endpoint Plus Generation
//!
//! Identifies one silo process: a socket endpoint plus a coarse generation
//! stamp that disambiguates restarts reusing the same endpoint. Generations
//! are truncated UTC seconds since a fixed 2010-01-01 epoch; generation zero
//! means "any generation" in match comparisons, and negative generations mark
//! client gateways.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, Result};
use crate::hashing;
use crate::interner::Interner;

/// Unix seconds at 2010-01-01T00:00:00Z, the generation epoch.
const GENERATION_EPOCH_SECS: u64 = 1_262_304_000;

static INTERNER: Lazy<Interner<(SocketAddr, i32), SiloAddress>> = Lazy::new(Interner::new);

static ZERO: Lazy<Arc<SiloAddress>> = Lazy::new(|| {
    SiloAddress::new(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        0,
    )
});

/// One silo process. Obtain instances through [`SiloAddress::new`], which
/// canonicalizes through the intern cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiloAddress {
    endpoint: SocketAddr,
    generation: i32,
}

impl SiloAddress {
    pub fn new(endpoint: SocketAddr, generation: i32) -> Arc<SiloAddress> {
        INTERNER.find_or_create((endpoint, generation), || SiloAddress {
            endpoint,
            generation,
        })
    }

    /// The all-zero placeholder address.
    pub fn zero() -> Arc<SiloAddress> {
        ZERO.clone()
    }

    /// Stamp a new generation from the wall clock. Restarts within the same
    /// second collide, which the cluster tolerates the same way it tolerates
    /// clock skew between silos.
    pub fn allocate_new_generation() -> i32 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_sub(GENERATION_EPOCH_SECS) as i32
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    /// Client gateways carry negative generations.
    pub fn is_client(&self) -> bool {
        self.generation < 0
    }

    /// Same silo modulo restart: endpoints agree and either generation is
    /// zero or both agree. Strict equality additionally requires the
    /// generations to agree exactly.
    pub fn matches(&self, other: &SiloAddress) -> bool {
        self.endpoint == other.endpoint
            && (self.generation == other.generation
                || self.generation == 0
                || other.generation == 0)
    }

    /// Uniform hash for consistent-ring placement.
    pub fn consistent_hash_code(&self) -> u32 {
        hashing::jenkins_hash(self.to_parsable_string().as_bytes())
    }

    /// Bijective string form: `ip:port@generation`.
    pub fn to_parsable_string(&self) -> String {
        format!("{}@{}", self.endpoint, self.generation)
    }

    /// Inverse of [`to_parsable_string`].
    ///
    /// [`to_parsable_string`]: SiloAddress::to_parsable_string
    pub fn from_parsable_string(input: &str) -> Result<Arc<SiloAddress>> {
        let (ep, gen) = input.rsplit_once('@').ok_or_else(|| {
            IdentityError::parse("expected ip:port@generation", input)
        })?;
        let endpoint = SocketAddr::from_str(ep)
            .map_err(|e| IdentityError::parse(format!("bad endpoint: {}", e), input))?;
        let generation = gen
            .parse::<i32>()
            .map_err(|e| IdentityError::parse(format!("bad generation: {}", e), input))?;
        Ok(Self::new(endpoint, generation))
    }

    /// Drop the intern cache. Teardown/test hook.
    pub fn flush_intern_cache() {
        INTERNER.clear();
    }
}

impl fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.to_parsable_string())
    }
}
