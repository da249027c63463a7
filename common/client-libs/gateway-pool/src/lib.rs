// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

//! Client-side pool of gateway connections.
//!
//! The [`HostPool`] keeps a bounded set of connected gateways healthy: it probes candidates,
//! pins their certificates, replaces failing members and periodically rotates them.
//! The [`GatewaySender`] routes messages through the pool members.

mod bucket;
pub mod cert_checker;
pub mod config;
pub mod error;
pub mod host;
pub mod host_pool;
pub mod identity;
pub mod ndf;
pub mod pool;
pub mod random;
pub mod sender;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use cert_checker::{CertChecker, CertificateProvider, GatewayCertificate};
pub use config::Config;
pub use error::{
    BoxedError, CertificateError, GatewayPoolError, GuiltyReason, PoolError, SendError,
    SendErrorKind, StorageError,
};
pub use host::{GatewayHost, HostDetails, HostManager, HostParams};
pub use host_pool::HostPool;
pub use identity::{GatewayId, IdType};
pub use ndf::{GatewayFilter, NetworkDefinition, NetworkGateway, NodeStatus};
pub use pool::Pool;
pub use random::{OsRandomSource, RandomSource};
pub use sender::GatewaySender;
pub use storage::{FsStore, InMemStore, KeyValueStore, PrefixedStore};
