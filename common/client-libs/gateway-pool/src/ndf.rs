// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::host::HostDetails;
use crate::identity::GatewayId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping of eligible gateway identities to their index in [`NetworkDefinition::gateways`].
pub type Universe = HashMap<GatewayId, usize>;

/// User supplied function narrowing down the set of gateways the pool may connect to.
pub type GatewayFilter = Arc<dyn Fn(Universe, &NetworkDefinition) -> Universe + Send + Sync>;

pub fn passthrough_filter() -> GatewayFilter {
    Arc::new(|universe, _| universe)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Active,
    Stale,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkGateway {
    pub identity: GatewayId,
    pub address: String,

    #[serde(default)]
    pub tls_certificate: Option<Vec<u8>>,

    pub identity_key: [u8; 32],

    #[serde(default)]
    pub status: NodeStatus,
}

impl NetworkGateway {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    pub fn host_details(&self) -> HostDetails {
        HostDetails {
            address: self.address.clone(),
            certificate: self.tls_certificate.clone(),
            identity_key: self.identity_key,
        }
    }
}

/// Snapshot of the network as seen by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub gateways: Vec<NetworkGateway>,
}

impl NetworkDefinition {
    pub fn new(gateways: Vec<NetworkGateway>) -> Self {
        NetworkDefinition { gateways }
    }

    /// Identities of all active gateways mapped to their position, before any filtering.
    pub fn active_universe(&self) -> Universe {
        self.gateways
            .iter()
            .enumerate()
            .filter(|(_, gateway)| gateway.is_active())
            .map(|(index, gateway)| (gateway.identity, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::network_gateway;

    #[test]
    fn inactive_gateways_are_not_part_of_the_universe() {
        let mut stale = network_gateway(2);
        stale.status = NodeStatus::Stale;
        let ndf = NetworkDefinition::new(vec![network_gateway(1), stale, network_gateway(3)]);

        let universe = ndf.active_universe();
        assert_eq!(universe.len(), 2);
        assert_eq!(universe[&network_gateway(3).identity], 2);
        assert!(!universe.contains_key(&network_gateway(2).identity));
    }

    #[test]
    fn passthrough_filter_keeps_everything() {
        let ndf = NetworkDefinition::new(vec![network_gateway(1), network_gateway(2)]);
        let filtered = passthrough_filter()(ndf.active_universe(), &ndf);
        assert_eq!(filtered, ndf.active_universe());
    }
}
