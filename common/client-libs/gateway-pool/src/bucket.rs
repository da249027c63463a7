// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::OfflineDetection;
use std::time::Duration;
use tokio::time::Instant;

/// Leaky bucket fed by gateway removals.
///
/// A steady trickle of removals is normal churn. Once more members fail within a short window
/// than the pool can hold, it is far more likely that we are the ones offline, so the coordinator
/// should slow down instead of cycling through the entire network.
#[derive(Debug)]
pub(crate) struct OnlineBucket {
    capacity: u32,
    level: u32,
    last_leak: Instant,
    config: OfflineDetection,
}

impl OnlineBucket {
    pub(crate) fn new(capacity: usize, config: OfflineDetection) -> Self {
        OnlineBucket {
            capacity: u32::try_from(capacity).unwrap_or(u32::MAX),
            level: 0,
            last_leak: Instant::now(),
            config,
        }
    }

    fn leak(&mut self) {
        let now = Instant::now();
        if self.config.leak_interval.is_zero() {
            self.level = 0;
            self.last_leak = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_leak);
        let leaked = elapsed.as_nanos() / self.config.leak_interval.as_nanos();
        if leaked == 0 {
            return;
        }

        let leaked = u32::try_from(leaked).unwrap_or(u32::MAX);
        if leaked >= self.level {
            self.level = 0;
            self.last_leak = now;
        } else {
            self.level -= leaked;
            self.last_leak += self.config.leak_interval * leaked;
        }
    }

    pub(crate) fn add(&mut self) {
        self.leak();
        if self.level == 0 {
            self.last_leak = Instant::now();
        }
        self.level = self.level.saturating_add(1);
    }

    pub(crate) fn reset(&mut self) {
        self.level = 0;
        self.last_leak = Instant::now();
    }

    pub(crate) fn level(&mut self) -> u32 {
        self.leak();
        self.level
    }

    /// Time the coordinator should pause before handling its next event.
    pub(crate) fn delay(&mut self) -> Duration {
        let overflow = self.level().saturating_sub(self.capacity);
        if overflow == 0 {
            return Duration::ZERO;
        }
        self.config
            .base_delay
            .saturating_mul(overflow)
            .min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> OfflineDetection {
        OfflineDetection {
            leak_interval: Duration::from_secs(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_delay_within_capacity() {
        let mut bucket = OnlineBucket::new(3, detection());
        for _ in 0..3 {
            bucket.add();
        }
        assert_eq!(bucket.delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_delays_up_to_the_cap() {
        let mut bucket = OnlineBucket::new(2, detection());
        for _ in 0..3 {
            bucket.add();
        }
        assert_eq!(bucket.delay(), Duration::from_millis(100));

        for _ in 0..5 {
            bucket.add();
        }
        assert_eq!(bucket.delay(), Duration::from_millis(250));

        bucket.reset();
        assert_eq!(bucket.delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_leak_over_time() {
        let mut bucket = OnlineBucket::new(1, detection());
        for _ in 0..4 {
            bucket.add();
        }
        assert_eq!(bucket.level(), 4);

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(bucket.level(), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(bucket.level(), 0);
    }
}
