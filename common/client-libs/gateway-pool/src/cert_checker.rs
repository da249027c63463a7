// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BoxedError, CertificateError, StorageError};
use crate::host::GatewayHost;
use crate::identity::GatewayId;
use crate::storage::{KeyValueStore, PrefixedStore};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CERT_CHECKER_PREFIX: &str = "certChecker";
const FINGERPRINT_VERSION: u64 = 0;

pub type Fingerprint = [u8; 32];

/// Certificate a gateway declares for itself together with the signature made with its identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCertificate {
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Retrieves the certificate a gateway has declared, usually by querying the gateway directly.
#[async_trait]
pub trait CertificateProvider<H>: Send + Sync {
    async fn gateway_certificate(&self, host: &H) -> Result<GatewayCertificate, BoxedError>;
}

pub fn fingerprint(certificate: &[u8]) -> Fingerprint {
    Sha256::digest(certificate).into()
}

/// Pins the TLS certificates used by gateways.
///
/// A certificate is trusted once its signature made with the gateway's identity key checks out.
/// Its fingerprint is then persisted so that subsequent connections only have to compare hashes.
pub struct CertChecker<H> {
    provider: Arc<dyn CertificateProvider<H>>,
    store: PrefixedStore,
    known: RwLock<HashMap<GatewayId, Fingerprint>>,
}

impl<H: GatewayHost> CertChecker<H> {
    pub fn new(provider: Arc<dyn CertificateProvider<H>>, store: Arc<dyn KeyValueStore>) -> Self {
        CertChecker {
            provider,
            store: PrefixedStore::new(store, CERT_CHECKER_PREFIX),
            known: RwLock::new(HashMap::new()),
        }
    }

    pub async fn check_remote_certificate(&self, host: &H) -> Result<(), CertificateError> {
        if !host.uses_tls() {
            return Ok(());
        }

        let gateway = host.identity();
        let declared = self
            .provider
            .gateway_certificate(host)
            .await
            .map_err(|source| CertificateError::ProviderFailure { gateway, source })?;

        let remote = host
            .remote_certificate()
            .ok_or(CertificateError::MissingRemoteCertificate { gateway })?;

        let remote_fingerprint = fingerprint(&remote);
        if remote_fingerprint != fingerprint(&declared.certificate) {
            warn!("{gateway} presented a certificate different from the one it has declared");
            return Err(CertificateError::FingerprintMismatch { gateway });
        }

        if self.stored_fingerprint(gateway).await? == Some(remote_fingerprint) {
            return Ok(());
        }

        verify_signature(gateway, host.identity_key(), &declared)?;

        self.store
            .set(
                &gateway.to_base58_string(),
                FINGERPRINT_VERSION,
                remote_fingerprint.to_vec(),
            )
            .await?;
        self.known.write().insert(gateway, remote_fingerprint);
        debug!("pinned the certificate of {gateway}");

        Ok(())
    }

    async fn stored_fingerprint(
        &self,
        gateway: GatewayId,
    ) -> Result<Option<Fingerprint>, StorageError> {
        let cached = self.known.read().get(&gateway).copied();
        if cached.is_some() {
            return Ok(cached);
        }

        let key = gateway.to_base58_string();
        let Some(raw) = self.store.get(&key, FINGERPRINT_VERSION).await? else {
            return Ok(None);
        };

        let stored: Fingerprint =
            raw.try_into()
                .map_err(|raw: Vec<u8>| StorageError::MalformedRecord {
                    key,
                    reason: format!("expected a 32 byte fingerprint, got {} bytes", raw.len()),
                })?;

        self.known.write().insert(gateway, stored);
        Ok(Some(stored))
    }
}

fn verify_signature(
    gateway: GatewayId,
    identity_key: [u8; 32],
    declared: &GatewayCertificate,
) -> Result<(), CertificateError> {
    let key = VerifyingKey::from_bytes(&identity_key)
        .map_err(|source| CertificateError::MalformedIdentityKey { gateway, source })?;
    let signature = Signature::from_slice(&declared.signature)
        .map_err(|source| CertificateError::MalformedSignature { gateway, source })?;

    key.verify(&declared.certificate, &signature)
        .map_err(|source| CertificateError::InvalidSignature { gateway, source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::InMemStore;
    use crate::testing::{certificate, gateway_id, MockCertProvider, MockHost};

    struct Setup {
        checker: CertChecker<MockHost>,
        provider: Arc<MockCertProvider>,
        store: Arc<InMemStore>,
    }

    fn setup() -> Setup {
        let provider = Arc::new(MockCertProvider::default());
        let store = Arc::new(InMemStore::default());
        Setup {
            checker: CertChecker::new(provider.clone(), store.clone()),
            provider,
            store,
        }
    }

    fn tls_host(seed: u8) -> MockHost {
        let host = MockHost::new(seed);
        host.set_tls(true);
        host
    }

    #[tokio::test]
    async fn plain_connections_are_not_checked() -> anyhow::Result<()> {
        let setup = setup();
        // the provider knows nothing about this gateway
        setup
            .checker
            .check_remote_certificate(&MockHost::new(1))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn valid_signature_pins_the_fingerprint() -> anyhow::Result<()> {
        let setup = setup();
        setup.provider.sign_for(1);
        let host = tls_host(1);

        setup.checker.check_remote_certificate(&host).await?;

        let stored = setup
            .store
            .get(
                &format!("{CERT_CHECKER_PREFIX}/{}", gateway_id(1)),
                FINGERPRINT_VERSION,
            )
            .await?;
        assert_eq!(stored, Some(fingerprint(&certificate(1)).to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn stored_fingerprint_skips_signature_verification() -> anyhow::Result<()> {
        let setup = setup();
        setup.provider.sign_for(1);
        let host = tls_host(1);
        setup.checker.check_remote_certificate(&host).await?;

        // a fresh checker only has the persisted record to go on
        setup.provider.corrupt_signature(1);
        let restarted = CertChecker::new(setup.provider.clone(), setup.store.clone());
        restarted.check_remote_certificate(&host).await?;

        // while a gateway without a pinned certificate gets rejected
        setup.provider.sign_for(2);
        setup.provider.corrupt_signature(2);
        let err = restarted
            .check_remote_certificate(&tls_host(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::InvalidSignature { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn certificate_mismatch_is_rejected() {
        let setup = setup();
        setup.provider.sign_for(1);
        let host = tls_host(1);
        host.set_remote_certificate(Some(b"some other certificate".to_vec()));

        let err = setup
            .checker
            .check_remote_certificate(&host)
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::FingerprintMismatch { .. }));

        host.set_remote_certificate(None);
        let err = setup
            .checker
            .check_remote_certificate(&host)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CertificateError::MissingRemoteCertificate { .. }
        ));
    }

    #[tokio::test]
    async fn signature_by_another_key_is_rejected() {
        let setup = setup();
        setup.provider.sign_with(1, 7);

        let err = setup
            .checker
            .check_remote_certificate(&tls_host(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::InvalidSignature { .. }));
    }

    #[tokio::test]
    async fn provider_failures_are_propagated() {
        let setup = setup();
        let err = setup
            .checker
            .check_remote_certificate(&tls_host(3))
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::ProviderFailure { .. }));
    }
}
