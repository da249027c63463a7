// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::host_pool::AddRequestSender;
use crate::random::RandomSource;
use nym_task::ShutdownToken;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Periodically requests a new gateway so that the pool keeps on exploring the network.
#[derive(Clone)]
pub(crate) struct Rotation {
    add_tx: AddRequestSender,
    period: Duration,
    variability: Duration,
    random: Arc<dyn RandomSource>,
}

impl Rotation {
    pub(crate) fn new(
        add_tx: AddRequestSender,
        period: Duration,
        variability: Duration,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Rotation {
            add_tx,
            period,
            variability,
            random,
        }
    }

    fn next_delay(&self) -> Duration {
        let mut rng = self.random.stream();
        jittered(self.period, self.variability, rng.as_mut())
    }

    pub(crate) async fn run(self, shutdown: ShutdownToken) {
        debug!("started host pool rotation");

        loop {
            let delay = self.next_delay();
            trace!("next rotation in {delay:?}");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = self.add_tx.try_send(None) {
                        debug!("failed to request rotation: {err}");
                    }
                }
            }
        }

        trace!("host pool rotation: exiting");
    }
}

/// Uniformly distributed within `period ± variability / 2`.
pub(crate) fn jittered<R: Rng + ?Sized>(
    period: Duration,
    variability: Duration,
    rng: &mut R,
) -> Duration {
    if variability.is_zero() {
        return period;
    }
    let variability_nanos = u64::try_from(variability.as_nanos()).unwrap_or(u64::MAX);
    let offset = Duration::from_nanos(rng.gen_range(0..=variability_nanos));
    (period + offset).saturating_sub(variability / 2)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::random::OsRandomSource;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use tokio::sync::mpsc;

    #[test]
    fn jitter_stays_within_bounds() {
        let period = Duration::from_secs(7 * 60);
        let variability = Duration::from_secs(4 * 60);
        let mut rng = ChaCha20Rng::seed_from_u64(1);

        let mut shortest = Duration::MAX;
        let mut longest = Duration::ZERO;
        for _ in 0..1000 {
            let delay = jittered(period, variability, &mut rng);
            assert!(delay >= Duration::from_secs(5 * 60));
            assert!(delay <= Duration::from_secs(9 * 60));
            shortest = shortest.min(delay);
            longest = longest.max(delay);
        }

        // it's actually jittered
        assert!(longest - shortest > Duration::from_secs(60));
        assert_eq!(jittered(period, Duration::ZERO, &mut rng), period);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_additions_periodically() {
        let (add_tx, mut add_rx) = mpsc::channel(8);
        let rotation = Rotation::new(
            add_tx,
            Duration::from_secs(60),
            Duration::from_secs(10),
            Arc::new(OsRandomSource),
        );
        let shutdown = ShutdownToken::ephemeral();
        let handle = tokio::spawn(rotation.run(shutdown.clone()));

        assert!(add_rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(66)).await;
        assert_eq!(add_rx.try_recv().unwrap(), None);

        tokio::time::sleep(Duration::from_secs(66)).await;
        assert_eq!(add_rx.try_recv().unwrap(), None);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
