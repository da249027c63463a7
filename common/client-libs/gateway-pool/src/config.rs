// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::GatewayPoolError;
use crate::host::HostParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// 'POOL'
const DEFAULT_MAX_POOL_SIZE: usize = 30;
const DEFAULT_PROXY_ATTEMPTS: usize = 5;
const DEFAULT_MAX_PINGS: usize = 5;
const DEFAULT_CONNECTION_WORKERS: usize = 5;
const DEFAULT_MIN_BUFFER_LENGTH: usize = 100;

// upper bound of every mailbox
const MAX_MAILBOX_LENGTH: usize = 1 << 20;

// 'ROTATION'
const DEFAULT_ROTATION_PERIOD: Duration = Duration::from_secs(7 * 60);
const DEFAULT_ROTATION_VARIABILITY: Duration = Duration::from_secs(4 * 60);

// 'OFFLINE DETECTION'
const DEFAULT_LEAK_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_OFFLINE_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_OFFLINE_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of gateways kept in the pool. `0` derives it from the size of the network.
    pub pool_size: usize,

    /// Upper bound on the derived pool size.
    pub max_pool_size: usize,

    /// Number of distinct pool members a single send may attempt.
    pub proxy_attempts: usize,

    /// Maximum number of candidates probed together when looking for a new member.
    pub max_pings: usize,

    /// Number of concurrent node tester workers.
    pub connection_workers: usize,

    /// Lower bound on the capacity of the internal mailboxes.
    pub min_buffer_length: usize,

    pub rotation: Rotation,

    pub offline_detection: OfflineDetection,

    pub host_params: HostParams,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_size: 0,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            proxy_attempts: DEFAULT_PROXY_ATTEMPTS,
            max_pings: DEFAULT_MAX_PINGS,
            connection_workers: DEFAULT_CONNECTION_WORKERS,
            min_buffer_length: DEFAULT_MIN_BUFFER_LENGTH,
            rotation: Default::default(),
            offline_detection: Default::default(),
            host_params: Default::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, GatewayPoolError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn read_from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayPoolError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            GatewayPoolError::ConfigLoadFailure {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_rotation(mut self, enabled: bool) -> Self {
        self.rotation.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), GatewayPoolError> {
        if self.max_pool_size == 0 {
            return Err(GatewayPoolError::ZeroPoolCapacity);
        }
        if self.pool_size > self.max_pool_size {
            return Err(GatewayPoolError::InvalidConfig(format!(
                "pool size of {} exceeds the maximum of {}",
                self.pool_size, self.max_pool_size
            )));
        }
        if self.min_buffer_length > MAX_MAILBOX_LENGTH {
            return Err(GatewayPoolError::InvalidConfig(format!(
                "minimum buffer length must not exceed {MAX_MAILBOX_LENGTH}"
            )));
        }
        if self.proxy_attempts == 0 {
            return Err(GatewayPoolError::InvalidConfig(
                "at least a single proxy attempt must be allowed".into(),
            ));
        }
        if self.connection_workers == 0 {
            return Err(GatewayPoolError::InvalidConfig(
                "at least a single connection worker is required".into(),
            ));
        }
        if self.rotation.enabled && self.rotation.period.is_zero() {
            return Err(GatewayPoolError::InvalidConfig(
                "rotation period must be non-zero".into(),
            ));
        }
        if self.rotation.variability > self.rotation.period.saturating_mul(2) {
            return Err(GatewayPoolError::InvalidConfig(
                "rotation variability must not exceed twice the period".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the configuration against a network containing `gateways` entries.
    pub fn derive(&self, gateways: usize) -> Result<DerivedParams, GatewayPoolError> {
        self.validate()?;

        let pool_size = if self.pool_size == 0 {
            auto_pool_size(gateways, self.max_pool_size)?
        } else {
            self.pool_size
        };

        let mut max_pings = self.max_pings.max(1);
        let mut rotation_enabled = self.rotation.enabled;

        // too few gateways to keep probing batches without exhausting the network
        if pool_size.saturating_mul(max_pings) > gateways {
            rotation_enabled = false;
            max_pings = 1;
        }

        Ok(DerivedParams {
            pool_size,
            buffer_len: buffer_len(gateways, self.min_buffer_length),
            num_nodes_to_test: num_nodes_to_test(max_pings, gateways, pool_size),
            rotation_enabled,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Rotation {
    pub enabled: bool,

    /// Average time between two replacement requests.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Total width of the uniform jitter applied around `period`.
    #[serde(with = "humantime_serde")]
    pub variability: Duration,
}

impl Default for Rotation {
    fn default() -> Self {
        Rotation {
            enabled: true,
            period: DEFAULT_ROTATION_PERIOD,
            variability: DEFAULT_ROTATION_VARIABILITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OfflineDetection {
    #[serde(with = "humantime_serde")]
    pub leak_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for OfflineDetection {
    fn default() -> Self {
        OfflineDetection {
            leak_interval: DEFAULT_LEAK_INTERVAL,
            base_delay: DEFAULT_OFFLINE_BASE_DELAY,
            max_delay: DEFAULT_OFFLINE_MAX_DELAY,
        }
    }
}

/// Parameters resolved at startup from [`Config`] and the size of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedParams {
    pub pool_size: usize,
    pub buffer_len: usize,
    pub num_nodes_to_test: usize,
    pub rotation_enabled: bool,
}

/// ⌈√gateways⌉, capped at `max_size`.
pub fn auto_pool_size(gateways: usize, max_size: usize) -> Result<usize, GatewayPoolError> {
    if gateways == 0 {
        return Err(GatewayPoolError::NoGatewaysAvailable);
    }
    if max_size == 0 {
        return Err(GatewayPoolError::ZeroPoolCapacity);
    }

    let mut size = (gateways as f64).sqrt().ceil() as usize;
    // guard against float imprecision on perfect squares
    while size > 1 && (size - 1) * (size - 1) >= gateways {
        size -= 1;
    }
    Ok(size.min(max_size))
}

pub fn buffer_len(gateways: usize, min_buffer_length: usize) -> usize {
    gateways
        .saturating_mul(10)
        .max(min_buffer_length)
        .min(MAX_MAILBOX_LENGTH)
}

/// Number of candidates probed per batch so that the network is not exhausted.
pub fn num_nodes_to_test(max_pings: usize, gateways: usize, pool_size: usize) -> usize {
    let access_ratio = (gateways / pool_size.max(1)).max(1);
    max_pings.min(access_ratio)
}
