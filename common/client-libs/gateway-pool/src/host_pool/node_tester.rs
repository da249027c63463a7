// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::cert_checker::CertChecker;
use crate::host::{GatewayHost, HostParams};
use crate::host_pool::runner::TestBatch;
use crate::host_pool::AddRequestSender;
use crate::identity::GatewayId;
use futures::future::join_all;
use nym_task::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Worker probing batches of candidate gateways and connecting to the best one.
/// Clones share the same batch queue.
pub(crate) struct NodeTester<H> {
    batches: Arc<Mutex<mpsc::Receiver<TestBatch<H>>>>,
    new_host_tx: mpsc::Sender<Arc<H>>,
    done_tx: mpsc::Sender<Vec<GatewayId>>,
    add_tx: AddRequestSender,
    cert_checker: Arc<CertChecker<H>>,
    params: HostParams,
}

impl<H> Clone for NodeTester<H> {
    fn clone(&self) -> Self {
        NodeTester {
            batches: Arc::clone(&self.batches),
            new_host_tx: self.new_host_tx.clone(),
            done_tx: self.done_tx.clone(),
            add_tx: self.add_tx.clone(),
            cert_checker: Arc::clone(&self.cert_checker),
            params: self.params.clone(),
        }
    }
}

impl<H: GatewayHost> NodeTester<H> {
    pub(crate) fn new(
        batches: mpsc::Receiver<TestBatch<H>>,
        new_host_tx: mpsc::Sender<Arc<H>>,
        done_tx: mpsc::Sender<Vec<GatewayId>>,
        add_tx: AddRequestSender,
        cert_checker: Arc<CertChecker<H>>,
        params: HostParams,
    ) -> Self {
        NodeTester {
            batches: Arc::new(Mutex::new(batches)),
            new_host_tx,
            done_tx,
            add_tx,
            cert_checker,
            params,
        }
    }

    async fn next_batch(&self) -> Option<TestBatch<H>> {
        self.batches.lock().await.recv().await
    }

    pub(crate) async fn run(self, shutdown: ShutdownToken) {
        trace!("started node tester");

        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                batch = self.next_batch() => batch,
            };
            let Some(batch) = batch else {
                debug!("batch queue has been closed");
                break;
            };

            let tested: Vec<GatewayId> = batch.iter().map(|host| host.identity()).collect();
            let Some(winner) = shutdown.run_until_cancelled(self.test_batch(batch)).await else {
                break;
            };

            match winner {
                Some(host) => {
                    if let Err(err) = self.new_host_tx.try_send(host) {
                        warn!("failed to hand over a tested gateway: {err}");
                        err.into_inner().disconnect().await;
                    }
                }
                None => {
                    if let Err(err) = self.add_tx.try_send(None) {
                        warn!("failed to re-trigger a gateway addition: {err}");
                    }
                }
            }

            if let Err(err) = self.done_tx.try_send(tested) {
                warn!("failed to report finished testing: {err}");
            }
        }

        trace!("node tester: exiting");
    }

    /// Returns the connected, verified candidate with the lowest latency, if any.
    pub(crate) async fn test_batch(&self, batch: TestBatch<H>) -> Option<Arc<H>> {
        let ping_timeout = self.params.ping_timeout;
        let pings = batch.iter().map(|host| async move {
            let latency = match timeout(ping_timeout, host.ping()).await {
                Ok(Ok(latency)) => latency,
                Ok(Err(err)) => {
                    debug!("failed to ping {}: {err}", host.identity());
                    Duration::ZERO
                }
                Err(_) => {
                    debug!("pinging {} has timed out", host.identity());
                    Duration::ZERO
                }
            };
            (host, latency)
        });

        let best = join_all(pings)
            .await
            .into_iter()
            .filter(|(_, latency)| !latency.is_zero())
            .min_by_key(|(_, latency)| *latency)
            .map(|(host, _)| Arc::clone(host));

        let Some(best) = best else {
            debug!("none of the {} tested gateways are reachable", batch.len());
            return None;
        };
        let gateway = best.identity();

        if !best.is_connected() {
            match timeout(self.params.connection_timeout, best.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!("failed to connect to {gateway}: {err}");
                    return None;
                }
                Err(_) => {
                    warn!("connecting to {gateway} has timed out");
                    return None;
                }
            }
        }

        if let Err(err) = self.cert_checker.check_remote_certificate(&best).await {
            warn!("rejecting {gateway}: {err}");
            best.disconnect().await;
            return None;
        }

        trace!("{gateway} has passed the tests");
        Some(best)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::InMemStore;
    use crate::testing::{gateway_id, MockCertProvider, MockHost};

    struct Harness {
        tester: NodeTester<MockHost>,
        provider: Arc<MockCertProvider>,
        batch_tx: mpsc::Sender<TestBatch<MockHost>>,
        new_host_rx: mpsc::Receiver<Arc<MockHost>>,
        done_rx: mpsc::Receiver<Vec<GatewayId>>,
        add_rx: mpsc::Receiver<Option<GatewayId>>,
    }

    fn harness() -> Harness {
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let (new_host_tx, new_host_rx) = mpsc::channel(8);
        let (done_tx, done_rx) = mpsc::channel(8);
        let (add_tx, add_rx) = mpsc::channel(8);
        let provider = Arc::new(MockCertProvider::default());
        let cert_checker = Arc::new(CertChecker::new(
            provider.clone(),
            Arc::new(InMemStore::default()),
        ));

        Harness {
            tester: NodeTester::new(
                batch_rx,
                new_host_tx,
                done_tx,
                add_tx,
                cert_checker,
                HostParams::default(),
            ),
            provider,
            batch_tx,
            new_host_rx,
            done_rx,
            add_rx,
        }
    }

    fn hosts(seeds: &[u8]) -> Vec<Arc<MockHost>> {
        seeds.iter().map(|seed| Arc::new(MockHost::new(*seed))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_reachable_host_wins() {
        let harness = harness();
        let batch = hosts(&[1, 2, 3]);
        batch[0].set_latency(Some(Duration::from_millis(300)));
        batch[1].set_latency(Some(Duration::from_millis(50)));
        batch[2].set_latency(None);

        let winner = harness.tester.test_batch(batch.clone()).await.unwrap();
        assert_eq!(winner.identity(), gateway_id(2));
        assert!(winner.is_connected());
        assert_eq!(batch[0].connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pings_count_as_unreachable() {
        let harness = harness();
        let batch = hosts(&[1]);
        batch[0].set_latency(Some(Duration::from_secs(5)));

        assert!(harness.tester.test_batch(batch).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connection_means_no_winner() {
        let harness = harness();
        let batch = hosts(&[1]);
        batch[0].set_fail_connect(true);

        assert!(harness.tester.test_batch(batch.clone()).await.is_none());
        assert_eq!(batch[0].connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unverified_certificate_means_no_winner() {
        let harness = harness();
        let batch = hosts(&[1]);
        batch[0].set_tls(true);
        harness.provider.sign_with(1, 2);

        assert!(harness.tester.test_batch(batch.clone()).await.is_none());
        assert!(!batch[0].is_connected());
        assert_eq!(batch[0].disconnect_calls(), 1);

        harness.provider.sign_for(1);
        assert!(harness.tester.test_batch(batch).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_reported_back() -> anyhow::Result<()> {
        let mut harness = harness();
        let shutdown = ShutdownToken::ephemeral();
        let handle = tokio::spawn(harness.tester.clone().run(shutdown.clone()));

        harness.batch_tx.send(hosts(&[1, 2])).await?;
        let winner = harness.new_host_rx.recv().await.unwrap();
        assert_eq!(winner.identity(), gateway_id(1));
        assert_eq!(
            harness.done_rx.recv().await.unwrap(),
            vec![gateway_id(1), gateway_id(2)]
        );

        let unreachable = hosts(&[3]);
        unreachable[0].set_latency(None);
        harness.batch_tx.send(unreachable).await?;
        assert_eq!(harness.add_rx.recv().await.unwrap(), None);
        assert_eq!(harness.done_rx.recv().await.unwrap(), vec![gateway_id(3)]);

        shutdown.cancel();
        handle.await?;
        Ok(())
    }
}
