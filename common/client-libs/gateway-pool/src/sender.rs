// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::{GatewayPoolError, SendError, SendErrorKind};
use crate::host::{GatewayHost, HostManager};
use crate::host_pool::HostPool;
use crate::identity::GatewayId;
use nym_task::ShutdownToken;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Routes outgoing messages through the members of the [`HostPool`].
pub struct GatewaySender<M: HostManager> {
    pool: HostPool<M>,
}

impl<M: HostManager> Clone for GatewaySender<M> {
    fn clone(&self) -> Self {
        GatewaySender {
            pool: self.pool.clone(),
        }
    }
}

enum Attempt<T> {
    Sent(T),
    Failed(String),
}

fn is_stopped(stop: Option<&ShutdownToken>) -> bool {
    stop.is_some_and(|token| token.is_cancelled())
}

/// Walks the proxy lists one index at a time: the first proxy of every target,
/// then the second one of every target, and so on.
fn proxy_index_major<'a, T>(
    targets: &'a [GatewayId],
    proxy_lists: &'a [Vec<T>],
    depth: usize,
) -> impl Iterator<Item = (GatewayId, &'a T)> + 'a {
    (0..depth).flat_map(move |index| {
        targets
            .iter()
            .zip(proxy_lists)
            .filter_map(move |(target, proxies)| proxies.get(index).map(|proxy| (*target, proxy)))
    })
}

impl<M: HostManager> GatewaySender<M> {
    pub fn new(pool: HostPool<M>) -> Self {
        GatewaySender { pool }
    }

    pub fn host_pool(&self) -> &HostPool<M> {
        &self.pool
    }

    /// Decides what to do with a failed send. Guilty hosts get replaced, terminal errors end the call.
    fn handle_failure(
        &self,
        host: &Arc<M::Host>,
        err: SendError,
    ) -> Result<String, GatewayPoolError> {
        let gateway = host.identity();
        match err.kind() {
            SendErrorKind::Guilty(reason) => {
                warn!("sending via {gateway} has failed ({reason}), removing it from the pool: {err}");
                self.pool.remove(host);
                Ok(err.to_string())
            }
            SendErrorKind::Retryable => {
                debug!("sending via {gateway} has failed, trying another gateway: {err}");
                Ok(err.to_string())
            }
            SendErrorKind::Terminal => Err(GatewayPoolError::SendFailure {
                gateway,
                source: err,
            }),
        }
    }

    /// Sends via any of the pool members, trying up to `proxy_attempts` of them.
    pub async fn send_to_any<F, Fut, T>(
        &self,
        mut send_fn: F,
        stop: Option<&ShutdownToken>,
    ) -> Result<T, GatewayPoolError>
    where
        F: FnMut(Arc<M::Host>) -> Fut,
        Fut: Future<Output = Result<T, SendError>>,
    {
        let pool = self.pool.snapshot();
        pool.is_ready()?;

        let proxies = {
            let mut rng = self.pool.random().stream();
            pool.get_any(self.pool.config().proxy_attempts, &[], rng.as_mut())
        };

        let attempted = proxies.len();
        let mut last_error = None;
        for host in proxies {
            trace!("attempting to send via {}", host.identity());
            match send_fn(Arc::clone(&host)).await {
                Ok(res) => return Ok(res),
                Err(err) => last_error = Some(self.handle_failure(&host, err)?),
            }

            if is_stopped(stop) {
                return Err(GatewayPoolError::Cancelled);
            }
        }

        Err(GatewayPoolError::ExhaustedCandidates {
            attempted,
            last_error: last_error.unwrap_or_else(|| "no connected gateways".to_string()),
        })
    }

    async fn attempt<F, Fut, T>(
        &self,
        send_fn: &mut F,
        host: &Arc<M::Host>,
        target: GatewayId,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Attempt<T>, GatewayPoolError>
    where
        F: FnMut(Arc<M::Host>, GatewayId, Duration) -> Fut,
        Fut: Future<Output = Result<T, SendError>>,
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GatewayPoolError::Timeout { timeout });
        }

        trace!(
            "attempting to send to {target} via {} ({remaining:?} left)",
            host.identity()
        );
        match tokio::time::timeout(remaining, send_fn(Arc::clone(host), target, remaining)).await {
            Err(_) => Err(GatewayPoolError::Timeout { timeout }),
            Ok(Ok(res)) => Ok(Attempt::Sent(res)),
            Ok(Err(err)) => self.handle_failure(host, err).map(Attempt::Failed),
        }
    }

    /// Sends to the specified gateways, directly if they're pool members and via random proxies otherwise.
    /// The whole call, including every retry, has to complete within `timeout`.
    pub async fn send_to_preferred<F, Fut, T>(
        &self,
        targets: &[GatewayId],
        mut send_fn: F,
        stop: Option<&ShutdownToken>,
        timeout: Duration,
    ) -> Result<T, GatewayPoolError>
    where
        F: FnMut(Arc<M::Host>, GatewayId, Duration) -> Fut,
        Fut: Future<Output = Result<T, SendError>>,
    {
        let deadline = Instant::now() + timeout;
        let proxy_attempts = self.pool.config().proxy_attempts;

        let pool = self.pool.snapshot();
        pool.is_ready()?;

        let preferred = {
            let mut rng = self.pool.random().stream();
            pool.get_preferred(targets, rng.as_mut())
        };

        let mut bad_proxies = HashSet::new();
        let mut attempted = 0;
        let mut last_error = None;

        for (target, host) in preferred {
            attempted += 1;
            match self
                .attempt(&mut send_fn, &host, target, deadline, timeout)
                .await?
            {
                Attempt::Sent(res) => return Ok(res),
                Attempt::Failed(err) => {
                    bad_proxies.insert(host.identity());
                    last_error = Some(err);
                }
            }

            if is_stopped(stop) {
                return Err(GatewayPoolError::Cancelled);
            }
        }

        // the pool might have changed in the meantime
        let pool = self.pool.snapshot();
        let proxy_lists: Vec<_> = {
            let mut rng = self.pool.random().stream();
            targets
                .iter()
                .map(|_| pool.get_any(proxy_attempts, targets, rng.as_mut()))
                .collect()
        };

        for (target, proxy) in proxy_index_major(targets, &proxy_lists, proxy_attempts) {
            if bad_proxies.contains(&proxy.identity()) {
                continue;
            }

            attempted += 1;
            match self
                .attempt(&mut send_fn, proxy, target, deadline, timeout)
                .await?
            {
                Attempt::Sent(res) => return Ok(res),
                Attempt::Failed(err) => {
                    bad_proxies.insert(proxy.identity());
                    last_error = Some(err);
                }
            }

            if is_stopped(stop) {
                return Err(GatewayPoolError::Cancelled);
            }
        }

        Err(GatewayPoolError::ExhaustedCandidates {
            attempted,
            last_error: last_error.unwrap_or_else(|| "no connected gateways".to_string()),
        })
    }
}
