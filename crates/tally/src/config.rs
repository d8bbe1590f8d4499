//! Node configuration.

use serde::{Deserialize, Serialize};

use tally_core::{SettlementSchemeId, SubnetId};
use tally_peering::PeeringConfig;
use tally_settlement::SettlementConfig;

/// Configuration for a [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Subnet this node participates in.
    pub subnet_id: SubnetId,
    /// Where peers reach this node. Announced in the node's link state.
    pub url: String,
    /// Scheme used to settle with every peer.
    pub settlement_scheme_id: SettlementSchemeId,
    #[serde(default)]
    pub peering: PeeringConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

impl NodeConfig {
    pub fn new(
        subnet_id: impl Into<String>,
        url: impl Into<String>,
        settlement_scheme_id: impl Into<String>,
    ) -> Self {
        Self {
            subnet_id: SubnetId::new(subnet_id),
            url: url.into(),
            settlement_scheme_id: SettlementSchemeId::new(settlement_scheme_id),
            peering: PeeringConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }
}
