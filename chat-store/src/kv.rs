//! Key/value seam over the device's durable storage.
//!
//! The platform storage exposes a simple namespaced string get/set; this
//! module abstracts it behind [`KeyValueStore`] so the cache can be tested
//! against [`MemoryStore`] and wired to the real device storage in the app
//! shell.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage rejected the operation.
    #[error("storage failed: {0}")]
    Backend(String),
}

/// Namespaced string key/value storage.
///
/// Implementations must provide read-after-write consistency within the
/// process. Missing keys are `None`, never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `namespace`/`key`.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `namespace`/`key`, replacing any previous value.
    async fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove the value stored under `namespace`/`key`, if any.
    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

/// In-process key/value store.
///
/// Cloning shares state, so a test can hold one handle while the cache
/// holds another.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }

    /// Number of stored entries (for tests).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let map = self.inner.lock().await;
        Ok(map.get(&Self::full_key(namespace, key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: String) -> Result<(), StoreError> {
        let mut map = self.inner.lock().await;
        map.insert(Self::full_key(namespace, key), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut map = self.inner.lock().await;
        map.remove(&Self::full_key(namespace, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("chats", "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.set("chats", "u1", "[]".into()).await.unwrap();
        assert_eq!(store.get("chats", "u1").await.unwrap().unwrap(), "[]");
    }

    #[tokio::test]
    async fn set_replaces_previous_value() {
        let store = MemoryStore::new();
        store.set("chats", "u1", "old".into()).await.unwrap();
        store.set("chats", "u1", "new".into()).await.unwrap();
        assert_eq!(store.get("chats", "u1").await.unwrap().unwrap(), "new");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let store = MemoryStore::new();
        store.set("chats", "x", "a".into()).await.unwrap();
        store.set("messages", "x", "b".into()).await.unwrap();
        assert_eq!(store.get("chats", "x").await.unwrap().unwrap(), "a");
        assert_eq!(store.get("messages", "x").await.unwrap().unwrap(), "b");
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let store = MemoryStore::new();
        store.set("chats", "u1", "[]".into()).await.unwrap();
        store.remove("chats", "u1").await.unwrap();
        assert!(store.get("chats", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("chats", "u1", "[]".into()).await.unwrap();
        assert!(other.get("chats", "u1").await.unwrap().is_some());
    }
}
