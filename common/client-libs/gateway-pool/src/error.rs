// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::identity::GatewayId;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum GatewayPoolError {
    #[error("unable to create the host pool: the network definition contains no gateways")]
    NoGatewaysAvailable,

    #[error("the host pool must be able to hold at least a single gateway")]
    ZeroPoolCapacity,

    #[error("invalid host pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse the host pool configuration: {source}")]
    MalformedConfig {
        #[from]
        source: toml::de::Error,
    },

    #[error("failed to read the host pool configuration from {}: {source}", path.display())]
    ConfigLoadFailure { path: PathBuf, source: io::Error },

    #[error(
        "host pool is not ready, wait a little then try again. if this persists, you may have connectivity issues"
    )]
    NotReady,

    #[error("unable to send via any of the {attempted} attempted gateways. last error: {last_error}")]
    ExhaustedCandidates { attempted: usize, last_error: String },

    #[error("sending timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("the send operation got cancelled")]
    Cancelled,

    #[error("failed to send via gateway {gateway}: {source}")]
    SendFailure { gateway: GatewayId, source: SendError },

    #[error("the host pool processes are already running")]
    AlreadyRunning,

    #[error(transparent)]
    Pool(PoolError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<PoolError> for GatewayPoolError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotReady => GatewayPoolError::NotReady,
            other => GatewayPoolError::Pool(other),
        }
    }
}

impl GatewayPoolError {
    /// Whether the caller may reasonably retry the whole operation at a higher level,
    /// e.g. in the next round.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayPoolError::NotReady
                | GatewayPoolError::ExhaustedCandidates { .. }
                | GatewayPoolError::Timeout { .. }
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("there are no connected gateways in the host pool")]
    NotReady,

    #[error("cannot replace {gateway}, host does not exist in the pool")]
    NotInPool { gateway: GatewayId },

    #[error("no gateways available for selection")]
    NoCandidates,
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to retrieve the declared certificate of {gateway}: {source}")]
    ProviderFailure {
        gateway: GatewayId,
        source: BoxedError,
    },

    #[error("the connection to {gateway} does not expose the certificate it is using")]
    MissingRemoteCertificate { gateway: GatewayId },

    #[error("the certificate used by {gateway} does not match the certificate it has declared")]
    FingerprintMismatch { gateway: GatewayId },

    #[error("the identity key of {gateway} is malformed: {source}")]
    MalformedIdentityKey {
        gateway: GatewayId,
        source: ed25519_dalek::SignatureError,
    },

    #[error("the certificate signature of {gateway} is malformed: {source}")]
    MalformedSignature {
        gateway: GatewayId,
        source: ed25519_dalek::SignatureError,
    },

    #[error("the certificate of {gateway} has not been signed with its identity key: {source}")]
    InvalidSignature {
        gateway: GatewayId,
        source: ed25519_dalek::SignatureError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failure for key '{key}': {source}")]
    Io { key: String, source: io::Error },

    #[error("failed to (de)serialize the object stored under '{key}': {source}")]
    Codec { key: String, source: bincode::Error },

    #[error("the object stored under '{key}' has version {stored} while {expected} was expected")]
    VersionMismatch {
        key: String,
        stored: u64,
        expected: u64,
    },

    #[error("malformed record stored under '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },
}

/// Transport level failures that strongly indicate the gateway itself is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuiltyReason {
    Timeout,
    ConnectionRefused,
    Disconnected,
    TransportClosing,
    Unavailable,
    OverloadedProxy,
}

impl Display for GuiltyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GuiltyReason::Timeout => write!(f, "timed out"),
            GuiltyReason::ConnectionRefused => write!(f, "connection refused"),
            GuiltyReason::Disconnected => write!(f, "host disconnected"),
            GuiltyReason::TransportClosing => write!(f, "transport is closing"),
            GuiltyReason::Unavailable => write!(f, "connection unavailable"),
            GuiltyReason::OverloadedProxy => write!(f, "proxy is overloaded"),
        }
    }
}

/// How a failed send should be handled by the routing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Try the next candidate.
    Retryable,

    /// Try the next candidate and evict the one that failed.
    Guilty(GuiltyReason),

    /// Abort the whole call.
    Terminal,
}

impl Display for SendErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SendErrorKind::Retryable => write!(f, "retryable failure"),
            SendErrorKind::Guilty(reason) => write!(f, "gateway failure ({reason})"),
            SendErrorKind::Terminal => write!(f, "terminal failure"),
        }
    }
}

/// Error returned by the send functions handed to the [`GatewaySender`](crate::GatewaySender).
/// The sending function itself decides on the [`SendErrorKind`].
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct SendError {
    kind: SendErrorKind,
    source: BoxedError,
}

impl SendError {
    pub fn new(kind: SendErrorKind, source: impl Into<BoxedError>) -> Self {
        SendError {
            kind,
            source: source.into(),
        }
    }

    pub fn retryable(source: impl Into<BoxedError>) -> Self {
        Self::new(SendErrorKind::Retryable, source)
    }

    pub fn guilty(reason: GuiltyReason, source: impl Into<BoxedError>) -> Self {
        Self::new(SendErrorKind::Guilty(reason), source)
    }

    pub fn terminal(source: impl Into<BoxedError>) -> Self {
        Self::new(SendErrorKind::Terminal, source)
    }

    /// Classifies an io error: failures attributable to the remote host are guilty,
    /// everything else is terminal.
    pub fn from_io(err: io::Error) -> Self {
        match guilty_io_reason(err.kind()) {
            Some(reason) => SendError::guilty(reason, err),
            None => SendError::terminal(err),
        }
    }

    pub fn kind(&self) -> SendErrorKind {
        self.kind
    }

    pub fn is_guilty(&self) -> bool {
        matches!(self.kind, SendErrorKind::Guilty(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, SendErrorKind::Retryable)
    }

    pub fn into_source(self) -> BoxedError {
        self.source
    }
}

fn guilty_io_reason(kind: io::ErrorKind) -> Option<GuiltyReason> {
    match kind {
        io::ErrorKind::TimedOut => Some(GuiltyReason::Timeout),
        io::ErrorKind::ConnectionRefused => Some(GuiltyReason::ConnectionRefused),
        io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected => {
            Some(GuiltyReason::Disconnected)
        }
        io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
            Some(GuiltyReason::TransportClosing)
        }
        io::ErrorKind::AddrNotAvailable => Some(GuiltyReason::Unavailable),
        _ => None,
    }
}
