// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::StorageError;
use crate::identity::{GatewayId, GATEWAY_ID_LENGTH};
use crate::storage::KeyValueStore;

pub const HOST_POOL_PREFIX: &str = "hostPool";
pub const HOST_LIST_KEY: &str = "hostList";
pub const HOST_LIST_VERSION: u64 = 0;

const EMPTY_RECORD: [u8; GATEWAY_ID_LENGTH] = [0; GATEWAY_ID_LENGTH];

/// Flat concatenation of identity records. Empty slots are written as all-zero records.
pub fn marshal_host_list(list: &[Option<GatewayId>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(list.len() * GATEWAY_ID_LENGTH);
    for entry in list {
        match entry {
            Some(gateway) => buf.extend_from_slice(gateway.as_bytes()),
            None => buf.extend_from_slice(&EMPTY_RECORD),
        }
    }
    buf
}

pub fn unmarshal_host_list(raw: &[u8]) -> Result<Vec<Option<GatewayId>>, StorageError> {
    let malformed = |reason: String| StorageError::MalformedRecord {
        key: HOST_LIST_KEY.to_string(),
        reason,
    };

    if raw.len() % GATEWAY_ID_LENGTH != 0 {
        return Err(malformed(format!(
            "{} bytes is not a multiple of the {GATEWAY_ID_LENGTH} byte record length",
            raw.len()
        )));
    }

    raw.chunks_exact(GATEWAY_ID_LENGTH)
        .map(|record| {
            if record == EMPTY_RECORD {
                Ok(None)
            } else {
                GatewayId::try_from_bytes(record)
                    .map(Some)
                    .map_err(|err| malformed(err.to_string()))
            }
        })
        .collect()
}

pub async fn save_host_list<S: KeyValueStore + ?Sized>(
    store: &S,
    list: &[GatewayId],
) -> Result<(), StorageError> {
    let entries: Vec<_> = list.iter().copied().map(Some).collect();
    store
        .set(HOST_LIST_KEY, HOST_LIST_VERSION, marshal_host_list(&entries))
        .await
}

/// Loads the persisted member list, truncated or padded with empty slots to `pool_size` entries.
pub async fn get_host_prepared_list<S: KeyValueStore + ?Sized>(
    store: &S,
    pool_size: usize,
) -> Result<Vec<Option<GatewayId>>, StorageError> {
    let mut list = match store.get(HOST_LIST_KEY, HOST_LIST_VERSION).await? {
        Some(raw) => unmarshal_host_list(&raw)?,
        None => Vec::new(),
    };
    list.resize(pool_size, None);
    Ok(list)
}
