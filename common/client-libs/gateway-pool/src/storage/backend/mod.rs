// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

pub mod fs_backend;
pub mod mem_backend;

/// Envelope every backend persists values in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VersionedObject {
    pub(crate) version: u64,
    pub(crate) data: Vec<u8>,
}

impl VersionedObject {
    pub(crate) fn checked_data(
        self,
        key: &str,
        expected: u64,
    ) -> Result<Vec<u8>, crate::error::StorageError> {
        if self.version != expected {
            return Err(crate::error::StorageError::VersionMismatch {
                key: key.to_string(),
                stored: self.version,
                expected,
            });
        }
        Ok(self.data)
    }
}
