// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::BoxedError;
use crate::identity::GatewayId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a (potentially) live connection with a single gateway.
///
/// Implementations must tolerate `disconnect` being called concurrently with any other
/// operation, since snapshots held by senders may still reference a host that is being evicted.
#[async_trait]
pub trait GatewayHost: Send + Sync + 'static {
    fn identity(&self) -> GatewayId;

    fn address(&self) -> String;

    fn update_address(&self, address: &str);

    /// Raw ed25519 public key the gateway uses to sign its certificate.
    fn identity_key(&self) -> [u8; 32];

    fn is_connected(&self) -> bool;

    fn uses_tls(&self) -> bool;

    /// Certificate presented by the remote on the currently established connection.
    fn remote_certificate(&self) -> Option<Vec<u8>>;

    async fn connect(&self) -> Result<(), BoxedError>;

    async fn disconnect(&self);

    /// Measures the round trip latency to the gateway.
    async fn ping(&self) -> Result<Duration, BoxedError>;
}

/// Owner of all gateway connection handles.
pub trait HostManager: Send + Sync + 'static {
    type Host: GatewayHost;
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_host(&self, gateway: &GatewayId) -> Option<Arc<Self::Host>>;

    fn add_host(
        &self,
        gateway: GatewayId,
        details: HostDetails,
        params: &HostParams,
    ) -> Result<Arc<Self::Host>, Self::Error>;

    fn remove_host(&self, gateway: &GatewayId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDetails {
    pub address: String,
    pub certificate: Option<Vec<u8>>,
    pub identity_key: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostParams {
    /// Upper bound on establishing a connection with a tested gateway.
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Upper bound on a single latency probe.
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    pub auth_enabled: bool,
}

impl Default for HostParams {
    fn default() -> Self {
        HostParams {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            auth_enabled: false,
        }
    }
}
