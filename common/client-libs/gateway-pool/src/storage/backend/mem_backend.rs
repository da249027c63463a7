// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::StorageError;
use crate::storage::backend::VersionedObject;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
pub struct InMemStore {
    inner: Arc<RwLock<HashMap<String, VersionedObject>>>,
}

#[async_trait]
impl KeyValueStore for InMemStore {
    async fn get(&self, key: &str, version: u64) -> Result<Option<Vec<u8>>, StorageError> {
        let guard = self.inner.read().await;
        guard
            .get(key)
            .cloned()
            .map(|object| object.checked_data(key, version))
            .transpose()
    }

    async fn set(&self, key: &str, version: u64, data: Vec<u8>) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), VersionedObject { version, data });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_mismatch_is_reported() -> anyhow::Result<()> {
        let store = InMemStore::default();
        assert!(store.get("missing", 0).await?.is_none());

        store.set("key", 1, vec![1, 2, 3]).await?;
        assert_eq!(store.get("key", 1).await?, Some(vec![1, 2, 3]));
        assert!(matches!(
            store.get("key", 0).await,
            Err(StorageError::VersionMismatch { stored: 1, .. })
        ));
        Ok(())
    }
}
