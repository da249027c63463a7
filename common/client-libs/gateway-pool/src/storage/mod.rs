// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::StorageError;
use async_trait::async_trait;
use std::sync::Arc;

pub mod backend;
pub mod host_list;

pub use backend::fs_backend::FsStore;
pub use backend::mem_backend::InMemStore;

/// Versioned key-value storage of the records owned by the pool.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Loads the object stored under `key`. Fails if it was stored with a different version.
    async fn get(&self, key: &str, version: u64) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores the object under `key`, overwriting any previous value.
    async fn set(&self, key: &str, version: u64, data: Vec<u8>) -> Result<(), StorageError>;
}

/// View of a store where every key is scoped under a component prefix.
#[derive(Clone)]
pub struct PrefixedStore {
    prefix: String,
    inner: Arc<dyn KeyValueStore>,
}

impl PrefixedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        PrefixedStore {
            prefix: prefix.into(),
            inner,
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}/{key}", self.prefix)
    }
}

#[async_trait]
impl KeyValueStore for PrefixedStore {
    async fn get(&self, key: &str, version: u64) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(&self.scoped(key), version).await
    }

    async fn set(&self, key: &str, version: u64, data: Vec<u8>) -> Result<(), StorageError> {
        self.inner.set(&self.scoped(key), version, data).await
    }
}
