// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::StorageError;
use crate::storage::backend::VersionedObject;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Stores every key in its own file underneath the base directory.
/// Key segments separated by `/` map onto subdirectories.
#[derive(Debug, Clone)]
pub struct FsStore {
    base_dir: PathBuf,
}

impl FsStore {
    pub async fn init<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|source| StorageError::Io {
                key: base_dir.display().to_string(),
                source,
            })?;
        Ok(FsStore { base_dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.base_dir.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::MalformedRecord {
                    key: key.to_string(),
                    reason: "invalid key segment".to_string(),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl KeyValueStore for FsStore {
    async fn get(&self, key: &str, version: u64) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let object: VersionedObject =
            bincode::deserialize(&raw).map_err(|source| StorageError::Codec {
                key: key.to_string(),
                source,
            })?;
        object.checked_data(key, version).map(Some)
    }

    async fn set(&self, key: &str, version: u64, data: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source: io::Error| StorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let encoded = bincode::serialize(&VersionedObject { version, data }).map_err(|source| {
            StorageError::Codec {
                key: key.to_string(),
                source,
            }
        })?;

        // write then rename so that readers never observe a partially written file
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, encoded).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;
        trace!("persisted '{key}' to {}", path.display());
        Ok(())
    }
}
