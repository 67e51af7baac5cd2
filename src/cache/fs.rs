//! Filesystem Store
//!
//! A `CacheStorage` that survives restarts: one directory per store under a
//! root, one entry per `<id>.json` metadata file plus a `<id>.body` file
//! holding the raw body. Each store keeps an index of its entries in memory
//! and writes through to disk, so reads never touch the filesystem.
//!
//! A metadata file is only ever renamed into place after its body is
//! written, so an interrupted write leaves either the previous entry or
//! none at all.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStorage, CacheStore, InsertionOrder, StoreHandle};
use crate::error::{ProxyError, Result};
use crate::models::{ProxyResponse, ResponseSource};

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";
const TMP_EXT: &str = "tmp";

// == On-disk Entry ==
/// Entry metadata as written to `<id>.json`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    inserted_at: DateTime<Utc>,
}

impl StoredEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            status: entry.response.status,
            headers: entry.response.headers.clone(),
            inserted_at: entry.inserted_at,
        }
    }

    fn into_entry(self, body: Bytes) -> CacheEntry {
        CacheEntry {
            key: self.key,
            response: ProxyResponse {
                status: self.status,
                headers: self.headers,
                body,
                source: ResponseSource::Network,
            },
            inserted_at: self.inserted_at,
        }
    }
}

fn io_error(context: &str, path: &Path, e: io::Error) -> ProxyError {
    ProxyError::StoreUnavailable(format!("{} {}: {}", context, path.display(), e))
}

/// Store names become directory names, so they must be a single path
/// component.
fn check_store_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ProxyError::StoreUnavailable(format!(
            "invalid store name '{}'",
            name
        )))
    }
}

// == Filesystem Store ==
#[derive(Debug, Default)]
struct FsIndex {
    entries: HashMap<String, (u64, CacheEntry)>,
    order: InsertionOrder,
    next_id: u64,
}

/// One store directory.
#[derive(Debug)]
pub struct FsStore {
    name: String,
    dir: PathBuf,
    index: RwLock<FsIndex>,
}

impl FsStore {
    /// Loads (or creates) the store kept in `dir`.
    async fn load(name: &str, dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("cannot create", &dir, e))?;

        let mut loaded: Vec<(u64, CacheEntry)> = Vec::new();
        let mut next_id = 0;
        let mut listing = fs::read_dir(&dir)
            .await
            .map_err(|e| io_error("cannot list", &dir, e))?;

        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|e| io_error("cannot list", &dir, e))?
        {
            let path = item.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some(TMP_EXT) {
                let _ = fs::remove_file(&path).await;
                continue;
            }
            if ext != Some(META_EXT) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            next_id = next_id.max(id + 1);

            match read_entry(&path).await {
                Ok(entry) => loaded.push((id, entry)),
                Err(e) => warn!(store = name, error = %e, "Skipping unreadable entry"),
            }
        }

        // Oldest first, so a key written twice keeps its latest copy.
        loaded.sort_by_key(|(id, entry)| (entry.inserted_at, *id));
        let mut index = FsIndex {
            next_id,
            ..FsIndex::default()
        };
        for (id, entry) in loaded {
            let key = entry.key.clone();
            if let Some((stale_id, _)) = index.entries.insert(key.clone(), (id, entry)) {
                remove_files(&dir, stale_id).await;
            }
            index.order.touch(&key);
        }

        debug!(store = name, entries = index.entries.len(), "Store loaded");
        Ok(Self {
            name: name.to_string(),
            dir,
            index: RwLock::new(index),
        })
    }

    fn meta_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.{}", id, META_EXT))
    }

    fn body_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.{}", id, BODY_EXT))
    }

    /// Returns the current number of entries.
    pub async fn len(&self) -> usize {
        self.index.read().await.entries.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.index.read().await.entries.is_empty()
    }
}

async fn read_entry(meta: &Path) -> Result<CacheEntry> {
    let raw = fs::read(meta)
        .await
        .map_err(|e| io_error("cannot read", meta, e))?;
    let stored: StoredEntry = serde_json::from_slice(&raw)
        .map_err(|e| ProxyError::StoreUnavailable(format!("corrupt {}: {}", meta.display(), e)))?;
    let body_path = meta.with_extension(BODY_EXT);
    let body = fs::read(&body_path)
        .await
        .map_err(|e| io_error("cannot read", &body_path, e))?;
    Ok(stored.into_entry(Bytes::from(body)))
}

async fn remove_files(dir: &Path, id: u64) {
    for ext in [META_EXT, BODY_EXT] {
        let path = dir.join(format!("{}.{}", id, ext));
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove entry file");
            }
        }
    }
}

#[async_trait]
impl CacheStore for FsStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let index = self.index.read().await;
        Ok(index.entries.get(key).map(|(_, entry)| entry.clone()))
    }

    async fn put(&self, key: &str, response: ProxyResponse) -> Result<()> {
        // Writers hold the index lock for the whole write.
        let mut index = self.index.write().await;
        let id = match index.entries.get(key) {
            Some((id, _)) => *id,
            None => {
                index.next_id += 1;
                index.next_id - 1
            }
        };
        let entry = CacheEntry::new(key, response);

        let body_path = self.body_path(id);
        fs::write(&body_path, &entry.response.body)
            .await
            .map_err(|e| io_error("cannot write", &body_path, e))?;

        let meta = serde_json::to_vec(&StoredEntry::from_entry(&entry))
            .map_err(|e| ProxyError::StoreUnavailable(format!("cannot encode entry: {}", e)))?;
        let meta_path = self.meta_path(id);
        let tmp_path = meta_path.with_extension(TMP_EXT);
        fs::write(&tmp_path, meta)
            .await
            .map_err(|e| io_error("cannot write", &tmp_path, e))?;
        fs::rename(&tmp_path, &meta_path)
            .await
            .map_err(|e| io_error("cannot commit", &meta_path, e))?;

        index.entries.insert(key.to_string(), (id, entry));
        index.order.touch(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut index = self.index.write().await;
        let Some(id) = index.entries.get(key).map(|(id, _)| *id) else {
            return Ok(false);
        };

        // The metadata file is the entry; the body is only reclaimed.
        let meta_path = self.meta_path(id);
        match fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("cannot remove", &meta_path, e)),
        }
        let _ = fs::remove_file(self.body_path(id)).await;

        index.entries.remove(key);
        index.order.remove(key);
        Ok(true)
    }

    async fn keys_by_age(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let index = self.index.read().await;
        Ok(index
            .order
            .oldest_first()
            .filter_map(|key| {
                index
                    .entries
                    .get(key)
                    .map(|(_, entry)| (key.clone(), entry.inserted_at))
            })
            .collect())
    }
}

// == Filesystem Storage ==
/// Named stores kept as directories under one root.
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    stores: RwLock<HashMap<String, Arc<FsStore>>>,
}

impl FsStorage {
    /// Uses `root` as the store directory, creating it if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error("cannot create", &root, e))?;
        Ok(Self {
            root,
            stores: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CacheStorage for FsStorage {
    async fn open(&self, name: &str) -> Result<StoreHandle> {
        check_store_name(name)?;
        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
        let store = Arc::new(FsStore::load(name, self.root.join(name)).await?);
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        check_store_name(name)?;
        let mut stores = self.stores.write().await;
        let opened = stores.remove(name).is_some();

        let dir = self.root.join(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(opened),
            Err(e) => Err(io_error("cannot remove", &dir, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut listing = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error("cannot list", &self.root, e))?;
        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|e| io_error("cannot list", &self.root, e))?
        {
            let is_dir = item.file_type().await.is_ok_and(|t| t.is_dir());
            if let (true, Some(name)) = (is_dir, item.file_name().to_str()) {
                if check_store_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    /// Fresh directory under the system temp dir, removed on drop.
    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new(label: &str) -> Self {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            Self(std::env::temp_dir().join(format!(
                "offline-proxy-{}-{}-{}",
                label,
                std::process::id(),
                nanos
            )))
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = ScratchDir::new("reopen");
        {
            let storage = FsStorage::create(&dir.0).await.unwrap();
            let store = storage.open("assets-v1").await.unwrap();
            store
                .put(
                    "https://app.test/app.css",
                    ProxyResponse::new(200, "body{}").with_header("content-type", "text/css"),
                )
                .await
                .unwrap();
            store
                .put("https://app.test/app.js", ProxyResponse::new(200, "code"))
                .await
                .unwrap();
        }

        let storage = FsStorage::create(&dir.0).await.unwrap();
        let store = storage.open("assets-v1").await.unwrap();
        let entry = store.get("https://app.test/app.css").await.unwrap().unwrap();

        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.body, "body{}");
        assert_eq!(entry.response.header("content-type"), Some("text/css"));
        let keys: Vec<String> = store
            .keys_by_age()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["https://app.test/app.css", "https://app.test/app.js"]);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_entry() {
        let dir = ScratchDir::new("overwrite");
        let storage = FsStorage::create(&dir.0).await.unwrap();
        let store = storage.open("pages-v1").await.unwrap();

        store.put("k", ProxyResponse::new(200, "old")).await.unwrap();
        store.put("k", ProxyResponse::new(200, "new")).await.unwrap();
        drop(store);

        let reopened = FsStorage::create(&dir.0).await.unwrap();
        let store = reopened.open("pages-v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().response.body, "new");
        assert_eq!(store.keys_by_age().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_entry_stays_deleted() {
        let dir = ScratchDir::new("delete-entry");
        let storage = FsStorage::create(&dir.0).await.unwrap();
        let store = storage.open("runtime-v1").await.unwrap();
        store.put("k", ProxyResponse::new(200, "v")).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());

        let reopened = FsStorage::create(&dir.0).await.unwrap();
        let store = reopened.open("runtime-v1").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_listing_and_deletion() {
        let dir = ScratchDir::new("stores");
        let storage = FsStorage::create(&dir.0).await.unwrap();
        for name in ["pages-v1", "app-shell-v2", "app-shell-v1"] {
            storage.open(name).await.unwrap();
        }

        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["app-shell-v1", "app-shell-v2", "pages-v1"]
        );
        assert!(storage.delete("pages-v1").await.unwrap());
        assert!(!storage.delete("pages-v1").await.unwrap());
        assert!(!dir.0.join("pages-v1").exists());

        let reopened = FsStorage::create(&dir.0).await.unwrap();
        assert_eq!(
            reopened.keys().await.unwrap(),
            vec!["app-shell-v1", "app-shell-v2"]
        );
    }

    #[tokio::test]
    async fn test_interrupted_write_is_ignored() {
        let dir = ScratchDir::new("interrupted");
        let storage = FsStorage::create(&dir.0).await.unwrap();
        let store = storage.open("images-v1").await.unwrap();
        store.put("k", ProxyResponse::new(200, "png")).await.unwrap();
        std::fs::write(dir.0.join("images-v1").join("9.tmp"), b"{").unwrap();
        std::fs::write(dir.0.join("images-v1").join("9.body"), b"half").unwrap();

        let reopened = FsStorage::create(&dir.0).await.unwrap();
        let store = reopened.open("images-v1").await.unwrap();

        assert_eq!(store.keys_by_age().await.unwrap().len(), 1);
        assert!(!dir.0.join("images-v1").join("9.tmp").exists());
        store.put("other", ProxyResponse::new(200, "x")).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_names_must_be_one_component() {
        let dir = ScratchDir::new("names");
        let storage = FsStorage::create(&dir.0).await.unwrap();

        for name in ["", "..", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                storage.open(name).await,
                Err(ProxyError::StoreUnavailable(_))
            ));
        }
    }
}
