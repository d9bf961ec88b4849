//! # PlacementResult
//!
//! The placement/directory subsystem's answer to "where does this grain
//! run": either an existing activation it identified, or an instruction to
//! create a new activation on a chosen silo. The message layer stamps this
//! onto target headers via
//! [`Message::set_target_placement`](crate::Message::set_target_placement).

use std::sync::Arc;

use types::{ActivationAddress, ActivationId, SiloAddress};

use crate::error::{CodecError, Result};

#[derive(Debug, Clone)]
pub struct PlacementResult {
    silo: Arc<SiloAddress>,
    activation: Arc<ActivationId>,
    is_new_placement: bool,
    placement_strategy: Option<String>,
    grain_type: Option<String>,
}

impl PlacementResult {
    /// An existing activation the directory located.
    pub fn identify_selection(address: &ActivationAddress) -> Result<Self> {
        let silo = address
            .silo()
            .ok_or_else(|| CodecError::invalid_state("placement selection without a silo"))?;
        let activation = address.activation().ok_or_else(|| {
            CodecError::invalid_state("placement selection without an activation")
        })?;
        Ok(Self {
            silo: silo.clone(),
            activation: activation.clone(),
            is_new_placement: false,
            placement_strategy: None,
            grain_type: None,
        })
    }

    /// An instruction to create a new activation on `silo`.
    pub fn specify_creation(
        silo: Arc<SiloAddress>,
        placement_strategy: impl Into<String>,
        grain_type: Option<String>,
    ) -> Self {
        Self {
            silo,
            activation: ActivationId::new_id(),
            is_new_placement: true,
            placement_strategy: Some(placement_strategy.into()),
            grain_type,
        }
    }

    pub fn silo(&self) -> &Arc<SiloAddress> {
        &self.silo
    }

    pub fn activation(&self) -> &Arc<ActivationId> {
        &self.activation
    }

    pub fn is_new_placement(&self) -> bool {
        self.is_new_placement
    }

    pub fn placement_strategy(&self) -> Option<&str> {
        self.placement_strategy.as_deref()
    }

    pub fn grain_type(&self) -> Option<&str> {
        self.grain_type.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::GrainId;

    #[test]
    fn test_identify_selection_requires_complete_parts() {
        let incomplete =
            ActivationAddress::from_parts(None, Some(GrainId::from_long(1).unwrap()), None);
        assert!(PlacementResult::identify_selection(&incomplete).is_err());

        let complete = ActivationAddress::new_activation_address(
            SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 1),
            GrainId::from_long(1).unwrap(),
            ActivationId::new_id(),
        );
        let result = PlacementResult::identify_selection(&complete).unwrap();
        assert!(!result.is_new_placement());
        assert!(result.placement_strategy().is_none());
    }

    #[test]
    fn test_specify_creation_marks_new_placement() {
        let silo = SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 1);
        let result = PlacementResult::specify_creation(silo, "random", Some("Echo".into()));
        assert!(result.is_new_placement());
        assert_eq!(result.placement_strategy(), Some("random"));
        assert_eq!(result.grain_type(), Some("Echo"));
    }
}
