//! Store API
//!
//! The persistent key-value store API the host runtime supplies, grouped into
//! named stores, plus an in-memory implementation used by the HTTP host
//! adapter and the tests.
//!
//! Concurrent writers to one store are serialized here, by the store, not by
//! the engine. The engine never assumes read-your-write consistency across
//! interleaved operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::cache::{CacheEntry, InsertionOrder};
use crate::error::Result;
use crate::models::ProxyResponse;

/// Shared handle to one physical store.
pub type StoreHandle = Arc<dyn CacheStore>;

// == Store Traits ==
/// One named physical store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Physical store name.
    fn name(&self) -> &str;

    /// Looks up the entry stored for a request key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores a response, replacing any previous entry for the key.
    async fn put(&self, key: &str, response: ProxyResponse) -> Result<()>;

    /// Deletes one entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys with their insertion time, oldest first.
    async fn keys_by_age(&self) -> Result<Vec<(String, DateTime<Utc>)>>;
}

/// The set of named stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens a store by name, creating it if absent.
    async fn open(&self, name: &str) -> Result<StoreHandle>;

    /// Deletes a store and every entry in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Lists every store name.
    async fn keys(&self) -> Result<Vec<String>>;
}

// == Memory Store ==
#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, CacheEntry>,
    order: InsertionOrder,
}

/// In-memory physical store.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Returns the current number of entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, response: ProxyResponse) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(key, response));
        inner.order.touch(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.entries.remove(key).is_some();
        inner.order.remove(key);
        Ok(existed)
    }

    async fn keys_by_age(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .oldest_first()
            .filter_map(|key| {
                inner
                    .entries
                    .get(key)
                    .map(|entry| (key.clone(), entry.inserted_at))
            })
            .collect())
    }
}

// == Memory Storage ==
/// In-memory set of named stores.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    stores: RwLock<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a store without creating it.
    pub async fn peek(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.stores.read().await.get(name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<StoreHandle> {
        let mut stores = self.stores.write().await;
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(name)))
            .clone();
        Ok(store)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.stores.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.stores.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_and_is_idempotent() {
        let storage = MemoryStorage::new();

        let first = storage.open("assets-v1").await.unwrap();
        first.put("k", ProxyResponse::new(200, "v")).await.unwrap();
        let second = storage.open("assets-v1").await.unwrap();

        assert_eq!(second.name(), "assets-v1");
        assert!(second.get("k").await.unwrap().is_some());
        assert_eq!(storage.keys().await.unwrap(), vec!["assets-v1"]);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new("s");

        store.put("k", ProxyResponse::new(200, "old")).await.unwrap();
        store.put("k", ProxyResponse::new(200, "new")).await.unwrap();

        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.response.body, "new");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new("s");
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let store = MemoryStore::new("s");
        store.put("k", ProxyResponse::new(200, "v")).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.keys_by_age().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_by_age() {
        let store = MemoryStore::new("s");
        store.put("a", ProxyResponse::new(200, "1")).await.unwrap();
        store.put("b", ProxyResponse::new(200, "2")).await.unwrap();
        store.put("a", ProxyResponse::new(200, "3")).await.unwrap();

        let keys: Vec<String> = store
            .keys_by_age()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_delete_store() {
        let storage = MemoryStorage::new();
        storage.open("pages-v1").await.unwrap();

        assert!(storage.delete("pages-v1").await.unwrap());
        assert!(!storage.delete("pages-v1").await.unwrap());
        assert!(storage.peek("pages-v1").await.is_none());
    }
}
