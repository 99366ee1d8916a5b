//! Key-value store seam and the in-memory implementation.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// The get/set/delete interface a key-value adapter runs on.
///
/// Values are JSON documents. Keys are `/`-separated paths; `list` returns
/// every key under a prefix ending in `/`.
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Adds one to the counter at `key`, starting from zero, and returns the
    /// new value.
    ///
    /// The default reads then writes and is not atomic across processes.
    async fn increment(&self, key: &str) -> StorageResult<u64> {
        let next = match self.get(key).await? {
            Some(value) => value.as_u64().ok_or_else(|| {
                StorageError::unexpected(format!("counter '{}' holds {}", key, value))
            })? + 1,
            None => 1,
        };
        self.set(key, &Value::from(next)).await?;
        Ok(next)
    }
}

/// Process-local store, ordered by key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn increment(&self, key: &str) -> StorageResult<u64> {
        let mut entries = self.entries.write();
        let current = match entries.get(key) {
            Some(value) => value.as_u64().ok_or_else(|| {
                StorageError::unexpected(format!("counter '{}' holds {}", key, value))
            })?,
            None => 0,
        };
        entries.insert(key.to_string(), Value::from(current + 1));
        Ok(current + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_prefix_listing() {
        let store = MemoryStore::new();
        store.set("data/users/1", &json!({"id": 1})).await.unwrap();
        store.set("data/users/2", &json!({"id": 2})).await.unwrap();
        store.set("data/users2/1", &json!({"id": 1})).await.unwrap();

        let keys = store.list("data/users/").await.unwrap();
        assert_eq!(keys, vec!["data/users/1", "data/users/2"]);

        assert!(store.delete("data/users/1").await.unwrap());
        assert!(!store.delete("data/users/1").await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_increment_counts_from_one() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("_ids/users").await.unwrap(), 1);
        assert_eq!(store.increment("_ids/users").await.unwrap(), 2);

        store.set("bad", &json!("x")).await.unwrap();
        assert!(store.increment("bad").await.is_err());
    }
}
