// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub const NODE_ID_LENGTH: usize = 32;
pub const GATEWAY_ID_LENGTH: usize = NODE_ID_LENGTH + 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayIdError {
    #[error("expected {GATEWAY_ID_LENGTH} bytes of gateway identity, got {received}")]
    InvalidLength { received: usize },

    #[error("identity type byte {0} does not denote a gateway")]
    NotAGateway(u8),

    #[error("the identity is not valid base58: {0}")]
    MalformedBase58(#[from] bs58::decode::Error),
}

/// Network role encoded in the trailing byte of an identity.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    Generic = 0,
    Node = 1,
    User = 2,
    Gateway = 3,
}

impl IdType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(IdType::Generic),
            1 => Some(IdType::Node),
            2 => Some(IdType::User),
            3 => Some(IdType::Gateway),
            _ => None,
        }
    }
}

/// Identity of a gateway: the 32 byte node identifier followed by the [`IdType::Gateway`] byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId([u8; GATEWAY_ID_LENGTH]);

impl GatewayId {
    pub fn new(node_id: [u8; NODE_ID_LENGTH]) -> Self {
        let mut bytes = [0u8; GATEWAY_ID_LENGTH];
        bytes[..NODE_ID_LENGTH].copy_from_slice(&node_id);
        bytes[NODE_ID_LENGTH] = IdType::Gateway as u8;
        GatewayId(bytes)
    }

    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, GatewayIdError> {
        let bytes: [u8; GATEWAY_ID_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| GatewayIdError::InvalidLength {
                    received: bytes.len(),
                })?;

        let type_byte = bytes[NODE_ID_LENGTH];
        if IdType::from_byte(type_byte) != Some(IdType::Gateway) {
            return Err(GatewayIdError::NotAGateway(type_byte));
        }
        Ok(GatewayId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; GATEWAY_ID_LENGTH] {
        &self.0
    }

    pub fn node_id(&self) -> &[u8] {
        &self.0[..NODE_ID_LENGTH]
    }

    pub fn to_base58_string(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl FromStr for GatewayId {
    type Err = GatewayIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec()?;
        GatewayId::try_from_bytes(&bytes)
    }
}

impl Display for GatewayId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58_string())
    }
}

impl Debug for GatewayId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "GatewayId({self})")
    }
}

impl Serialize for GatewayId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58_string())
    }
}

impl<'de> Deserialize<'de> for GatewayId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
