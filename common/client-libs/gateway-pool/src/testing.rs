// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::expect_used, clippy::panic)]

use crate::cert_checker::{CertificateProvider, GatewayCertificate};
use crate::config::Config;
use crate::error::BoxedError;
use crate::host::{GatewayHost, HostDetails, HostManager, HostParams};
use crate::host_pool::HostPool;
use crate::identity::{GatewayId, NODE_ID_LENGTH};
use crate::ndf::{NetworkDefinition, NetworkGateway, NodeStatus};
use crate::random::OsRandomSource;
use crate::storage::InMemStore;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn gateway_id(seed: u8) -> GatewayId {
    GatewayId::new([seed; NODE_ID_LENGTH])
}

pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub(crate) fn certificate(seed: u8) -> Vec<u8> {
    format!("certificate of gateway {seed}").into_bytes()
}

pub(crate) fn network_gateway(seed: u8) -> NetworkGateway {
    NetworkGateway {
        identity: gateway_id(seed),
        address: format!("10.0.0.{seed}:9000"),
        tls_certificate: Some(certificate(seed)),
        identity_key: signing_key(seed).verifying_key().to_bytes(),
        status: NodeStatus::Active,
    }
}

/// Network made of gateways seeded `1..=n`.
pub(crate) fn test_network(n: u8) -> NetworkDefinition {
    NetworkDefinition::new((1..=n).map(network_gateway).collect())
}

/// Polls the condition until it holds, panicking after a few seconds.
pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition has not been met in time")
}

pub(crate) struct TestPool {
    pub(crate) pool: HostPool<MockHostManager>,
    pub(crate) manager: Arc<MockHostManager>,
    pub(crate) store: Arc<InMemStore>,
}

/// Host pool over mock hosts. Processes are not started.
pub(crate) async fn test_pool(
    config: Config,
    ndf: NetworkDefinition,
    store: Arc<InMemStore>,
) -> anyhow::Result<TestPool> {
    let manager = Arc::new(MockHostManager::default());
    let pool = HostPool::new(
        config,
        ndf,
        manager.clone(),
        store.clone(),
        Arc::new(MockCertProvider::default()),
        Arc::new(OsRandomSource),
        None,
    )
    .await?;
    Ok(TestPool {
        pool,
        manager,
        store,
    })
}

pub(crate) async fn wait_until_full(pool: &HostPool<MockHostManager>) {
    let capacity = pool.capacity();
    eventually(|| {
        let snapshot = pool.snapshot();
        snapshot.len() == capacity && snapshot.size() == capacity
    })
    .await
}

#[derive(Debug)]
pub(crate) struct MockHost {
    identity: GatewayId,
    address: Mutex<String>,
    identity_key: [u8; 32],
    connected: AtomicBool,
    tls: AtomicBool,
    fail_connect: AtomicBool,
    remote_certificate: Mutex<Option<Vec<u8>>>,
    latency: Mutex<Option<Duration>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MockHost {
    pub(crate) fn new(seed: u8) -> Self {
        Self::from_details(gateway_id(seed), network_gateway(seed).host_details())
    }

    pub(crate) fn from_details(identity: GatewayId, details: HostDetails) -> Self {
        let latency = Duration::from_millis(10 + identity.node_id()[0] as u64);
        MockHost {
            identity,
            address: Mutex::new(details.address),
            identity_key: details.identity_key,
            connected: AtomicBool::new(false),
            tls: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            remote_certificate: Mutex::new(details.certificate),
            latency: Mutex::new(Some(latency)),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst)
    }

    pub(crate) fn set_tls(&self, tls: bool) {
        self.tls.store(tls, Ordering::SeqCst)
    }

    pub(crate) fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst)
    }

    pub(crate) fn set_remote_certificate(&self, certificate: Option<Vec<u8>>) {
        *self.remote_certificate.lock() = certificate
    }

    /// `None` makes the host unreachable.
    pub(crate) fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayHost for MockHost {
    fn identity(&self) -> GatewayId {
        self.identity
    }

    fn address(&self) -> String {
        self.address.lock().clone()
    }

    fn update_address(&self, address: &str) {
        *self.address.lock() = address.to_string()
    }

    fn identity_key(&self) -> [u8; 32] {
        self.identity_key
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn uses_tls(&self) -> bool {
        self.tls.load(Ordering::SeqCst)
    }

    fn remote_certificate(&self) -> Option<Vec<u8>> {
        self.remote_certificate.lock().clone()
    }

    async fn connect(&self) -> Result<(), BoxedError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false)
    }

    async fn ping(&self) -> Result<Duration, BoxedError> {
        let latency = *self.latency.lock();
        match latency {
            Some(latency) => {
                tokio::time::sleep(latency).await;
                Ok(latency)
            }
            None => Err(io::Error::from(io::ErrorKind::TimedOut).into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("gateway {0} has been rejected")]
pub(crate) struct MockManagerError(GatewayId);

#[derive(Debug, Default)]
pub(crate) struct MockHostManager {
    hosts: Mutex<HashMap<GatewayId, Arc<MockHost>>>,
    removed: Mutex<Vec<GatewayId>>,
    rejected: Mutex<HashSet<GatewayId>>,
}

impl MockHostManager {
    pub(crate) fn host(&self, seed: u8) -> Arc<MockHost> {
        self.get_host(&gateway_id(seed))
            .expect("host has not been registered")
    }

    pub(crate) fn reject(&self, gateway: GatewayId) {
        self.rejected.lock().insert(gateway);
    }

    pub(crate) fn removed(&self) -> Vec<GatewayId> {
        self.removed.lock().clone()
    }

    pub(crate) fn registered(&self) -> usize {
        self.hosts.lock().len()
    }
}

impl HostManager for MockHostManager {
    type Host = MockHost;
    type Error = MockManagerError;

    fn get_host(&self, gateway: &GatewayId) -> Option<Arc<MockHost>> {
        self.hosts.lock().get(gateway).cloned()
    }

    fn add_host(
        &self,
        gateway: GatewayId,
        details: HostDetails,
        _params: &HostParams,
    ) -> Result<Arc<MockHost>, MockManagerError> {
        if self.rejected.lock().contains(&gateway) {
            return Err(MockManagerError(gateway));
        }
        let host = self
            .hosts
            .lock()
            .entry(gateway)
            .or_insert_with(|| Arc::new(MockHost::from_details(gateway, details)))
            .clone();
        Ok(host)
    }

    fn remove_host(&self, gateway: &GatewayId) {
        self.hosts.lock().remove(gateway);
        self.removed.lock().push(*gateway);
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockCertProvider {
    certificates: Mutex<HashMap<GatewayId, GatewayCertificate>>,
}

impl MockCertProvider {
    pub(crate) fn sign_for(&self, seed: u8) {
        self.sign_with(seed, seed)
    }

    /// Declares the certificate of `seed` signed with the key belonging to `key_seed`.
    pub(crate) fn sign_with(&self, seed: u8, key_seed: u8) {
        let certificate = certificate(seed);
        let signature = signing_key(key_seed).sign(&certificate).to_bytes().to_vec();
        self.certificates.lock().insert(
            gateway_id(seed),
            GatewayCertificate {
                certificate,
                signature,
            },
        );
    }

    pub(crate) fn corrupt_signature(&self, seed: u8) {
        if let Some(declared) = self.certificates.lock().get_mut(&gateway_id(seed)) {
            declared.signature[0] ^= 0xff;
        }
    }
}

#[async_trait]
impl CertificateProvider<MockHost> for MockCertProvider {
    async fn gateway_certificate(&self, host: &MockHost) -> Result<GatewayCertificate, BoxedError> {
        let declared = self.certificates.lock().get(&host.identity()).cloned();
        declared.ok_or_else(|| {
            format!("{} has not declared its certificate", host.identity()).into()
        })
    }
}
