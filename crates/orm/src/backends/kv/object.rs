//! Key-value store on top of an `object_store` backend (S3, GCS, Azure,
//! local files or memory).

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde_json::Value;

use crate::error::StorageResult;

use super::KeyValueStore;

/// One JSON object per key.
///
/// `increment` uses the read-then-write default, so counters are not safe
/// across processes sharing a bucket.
pub struct ObjectStoreKv {
    store: Arc<dyn ObjectStore>,
}

impl Debug for ObjectStoreKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreKv")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl ObjectStoreKv {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Backed by `object_store`'s in-memory implementation.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }
}

#[async_trait]
impl KeyValueStore for ObjectStoreKv {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        match self.store.get(&Path::from(key)).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let payload = PutPayload::from(serde_json::to_vec(value)?);
        self.store.put(&Path::from(key), payload).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = Path::from(key);
        match self.store.head(&path).await {
            Ok(_) => {
                self.store.delete(&path).await?;
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = Path::from(prefix.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }
}
