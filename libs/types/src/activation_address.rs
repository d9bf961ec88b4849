//! # ActivationAddress - Where A Grain Lives
//!
//! The routing triple (silo, grain, activation). "Complete" means all three
//! parts are present; "matches" compares only grain and activation so the
//! same logical activation is recognized after a silo migration.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::activation_id::ActivationId;
use crate::grain_id::GrainId;
use crate::silo_address::SiloAddress;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationAddress {
    silo: Option<Arc<SiloAddress>>,
    grain: Option<Arc<GrainId>>,
    activation: Option<Arc<ActivationId>>,
}

impl ActivationAddress {
    pub fn new_activation_address(
        silo: Arc<SiloAddress>,
        grain: Arc<GrainId>,
        activation: Arc<ActivationId>,
    ) -> Self {
        Self {
            silo: Some(silo),
            grain: Some(grain),
            activation: Some(activation),
        }
    }

    /// An address with any subset of its parts, as reconstructed from
    /// message headers.
    pub fn from_parts(
        silo: Option<Arc<SiloAddress>>,
        grain: Option<Arc<GrainId>>,
        activation: Option<Arc<ActivationId>>,
    ) -> Self {
        Self {
            silo,
            grain,
            activation,
        }
    }

    pub fn silo(&self) -> Option<&Arc<SiloAddress>> {
        self.silo.as_ref()
    }

    pub fn grain(&self) -> Option<&Arc<GrainId>> {
        self.grain.as_ref()
    }

    pub fn activation(&self) -> Option<&Arc<ActivationId>> {
        self.activation.as_ref()
    }

    /// All three parts present.
    pub fn is_complete(&self) -> bool {
        self.silo.is_some() && self.grain.is_some() && self.activation.is_some()
    }

    /// Same logical activation, ignoring which silo hosts it.
    pub fn matches(&self, other: &ActivationAddress) -> bool {
        self.grain == other.grain && self.activation == other.activation
    }
}

impl fmt::Display for ActivationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.silo {
            Some(silo) => write!(f, "{}", silo)?,
            None => write!(f, "S-")?,
        }
        match &self.grain {
            Some(grain) => write!(f, ":{}", grain)?,
            None => write!(f, ":-")?,
        }
        match &self.activation {
            Some(act) => write!(f, "{}", act),
            None => write!(f, "@-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_address(silo: &str) -> ActivationAddress {
        ActivationAddress::new_activation_address(
            SiloAddress::new(silo.parse().unwrap(), 1),
            GrainId::from_long(77).unwrap(),
            ActivationId::new_id(),
        )
    }

    #[test]
    fn test_completeness() {
        let full = full_address("10.0.0.1:11111");
        assert!(full.is_complete());

        let partial = ActivationAddress::from_parts(None, Some(GrainId::from_long(77).unwrap()), None);
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_matches_ignores_silo() {
        let grain = GrainId::from_long(5).unwrap();
        let activation = ActivationId::new_id();
        let a = ActivationAddress::new_activation_address(
            SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 1),
            grain.clone(),
            activation.clone(),
        );
        let b = ActivationAddress::new_activation_address(
            SiloAddress::new("10.0.0.2:22222".parse().unwrap(), 9),
            grain,
            activation,
        );
        assert!(a.matches(&b));
        assert_ne!(a, b);
    }
}
