//! Cache Store Registry
//!
//! Owns the mapping from logical cache role to versioned physical store
//! name, opens stores for the other components, and deletes stores left
//! behind by other builds. No other component builds store names.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheStorage, StoreHandle};
use crate::classify::RequestCategory;
use crate::error::Result;

// == Cache Role ==
/// Logical cache role. Each maps to exactly one physical store per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheRole {
    AppShell,
    Pages,
    Assets,
    Images,
    Runtime,
}

impl CacheRole {
    pub const ALL: [CacheRole; 5] = [
        CacheRole::AppShell,
        CacheRole::Pages,
        CacheRole::Assets,
        CacheRole::Images,
        CacheRole::Runtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::AppShell => "app-shell",
            CacheRole::Pages => "pages",
            CacheRole::Assets => "assets",
            CacheRole::Images => "images",
            CacheRole::Runtime => "runtime",
        }
    }

    /// Physical store name: `<role>-<version>`.
    pub fn store_name(&self, version: &str) -> String {
        format!("{}-{}", self.as_str(), version)
    }

    /// Role whose store backs a request category. Bypassed requests have none.
    pub fn for_category(category: RequestCategory) -> Option<CacheRole> {
        match category {
            RequestCategory::Navigation => Some(CacheRole::Pages),
            RequestCategory::RealtimeData => Some(CacheRole::Runtime),
            RequestCategory::Image => Some(CacheRole::Images),
            RequestCategory::StaticAsset | RequestCategory::Other => Some(CacheRole::Assets),
            RequestCategory::Bypass => None,
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a physical store name into its role and embedded version.
///
/// Returns None for names that do not follow the `<role>-<version>` layout.
pub fn parse_store_name(name: &str) -> Option<(CacheRole, &str)> {
    CacheRole::ALL.iter().find_map(|role| {
        name.strip_prefix(role.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|version| !version.is_empty())
            .map(|version| (*role, version))
    })
}

/// Returns true if a store name embeds the given build version.
pub fn embeds_version(name: &str, version: &str) -> bool {
    name.strip_suffix(version)
        .and_then(|prefix| prefix.strip_suffix('-'))
        .is_some_and(|prefix| !prefix.is_empty())
}

// == Store Registry ==
/// Resolves roles to stores for one build version.
#[derive(Clone)]
pub struct StoreRegistry {
    storage: Arc<dyn CacheStorage>,
    version: String,
}

impl StoreRegistry {
    pub fn new(storage: Arc<dyn CacheStorage>, version: impl Into<String>) -> Self {
        Self {
            storage,
            version: version.into(),
        }
    }

    /// Build version every store opened here embeds.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Physical store name for a role under this build.
    pub fn name_for(&self, role: CacheRole) -> String {
        role.store_name(&self.version)
    }

    // == Resolve ==
    /// Opens (or creates) the store for a role. Idempotent.
    pub async fn resolve(&self, role: CacheRole) -> Result<StoreHandle> {
        self.storage.open(&self.name_for(role)).await
    }

    /// Deletes this build's store for a role with every entry in it.
    /// Returns whether it existed.
    pub async fn discard(&self, role: CacheRole) -> Result<bool> {
        self.storage.delete(&self.name_for(role)).await
    }

    /// Names of every existing store left behind by another build.
    pub async fn superseded(&self) -> Result<Vec<String>> {
        let names = self.storage.keys().await?;
        Ok(names
            .into_iter()
            .filter(|name| !embeds_version(name, &self.version))
            .collect())
    }

    // == Reconcile ==
    /// Deletes every store that does not embed `current_version`.
    ///
    /// Returns the number of stores deleted. Stores embedding the current
    /// version are never touched.
    pub async fn reconcile_on_activate(&self, current_version: &str) -> Result<usize> {
        let names = self.storage.keys().await?;
        let mut deleted = 0;

        for name in names {
            if embeds_version(&name, current_version) {
                debug!(store = %name, "Keeping current store");
                continue;
            }
            if self.storage.delete(&name).await? {
                deleted += 1;
                let version = parse_store_name(&name).map_or("unknown", |(_, v)| v);
                info!(store = %name, version, "Deleted superseded store");
            }
        }

        Ok(deleted)
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::models::ProxyResponse;

    #[test]
    fn test_store_names() {
        assert_eq!(CacheRole::AppShell.store_name("v6"), "app-shell-v6");
        assert_eq!(CacheRole::Runtime.store_name("2024.1"), "runtime-2024.1");
    }

    #[test]
    fn test_parse_store_name() {
        assert_eq!(
            parse_store_name("app-shell-v6"),
            Some((CacheRole::AppShell, "v6"))
        );
        assert_eq!(
            parse_store_name("images-build-7"),
            Some((CacheRole::Images, "build-7"))
        );
        assert_eq!(parse_store_name("pages-"), None);
        assert_eq!(parse_store_name("legacy-cache"), None);
    }

    #[test]
    fn test_embeds_version() {
        assert!(embeds_version("app-shell-V2", "V2"));
        assert!(embeds_version("custom-V2", "V2"));
        assert!(!embeds_version("app-shell-xV2", "V2"));
        assert!(!embeds_version("V2", "V2"));
        assert!(!embeds_version("-V2", "V2"));
        assert!(!embeds_version("app-shell-V1", "V2"));
    }

    #[test]
    fn test_role_for_category() {
        assert_eq!(
            CacheRole::for_category(RequestCategory::Navigation),
            Some(CacheRole::Pages)
        );
        assert_eq!(
            CacheRole::for_category(RequestCategory::Other),
            Some(CacheRole::Assets)
        );
        assert_eq!(CacheRole::for_category(RequestCategory::Bypass), None);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = StoreRegistry::new(storage.clone(), "v1");

        let store = registry.resolve(CacheRole::Assets).await.unwrap();
        store.put("k", ProxyResponse::new(200, "x")).await.unwrap();
        let again = registry.resolve(CacheRole::Assets).await.unwrap();

        assert_eq!(again.name(), "assets-v1");
        assert!(again.get("k").await.unwrap().is_some());
        assert_eq!(storage.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_deletes_superseded_stores() {
        let storage = Arc::new(MemoryStorage::new());
        for name in [
            "app-shell-V1",
            "runtime-V1",
            "stock-vehicule-v6-core",
            "app-shell-V2",
            "pages-V2",
        ] {
            storage.open(name).await.unwrap();
        }
        let registry = StoreRegistry::new(storage.clone(), "V2");

        let deleted = registry.reconcile_on_activate("V2").await.unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["app-shell-V2", "pages-V2"]
        );
    }

    #[tokio::test]
    async fn test_reconcile_with_nothing_to_delete() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = StoreRegistry::new(storage.clone(), "V2");
        registry.resolve(CacheRole::Images).await.unwrap();

        assert_eq!(registry.reconcile_on_activate("V2").await.unwrap(), 0);
        assert_eq!(storage.keys().await.unwrap(), vec!["images-V2"]);
    }

    #[tokio::test]
    async fn test_superseded_lists_other_builds() {
        let storage = Arc::new(MemoryStorage::new());
        for name in ["assets-V1", "assets-V2"] {
            storage.open(name).await.unwrap();
        }
        let registry = StoreRegistry::new(storage, "V2");

        assert_eq!(registry.superseded().await.unwrap(), vec!["assets-V1"]);
    }

    #[tokio::test]
    async fn test_discard_removes_only_this_build() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open("app-shell-V1").await.unwrap();
        let registry = StoreRegistry::new(storage.clone(), "V2");
        let store = registry.resolve(CacheRole::AppShell).await.unwrap();
        store.put("/", ProxyResponse::new(200, "shell")).await.unwrap();

        assert!(registry.discard(CacheRole::AppShell).await.unwrap());
        assert!(!registry.discard(CacheRole::AppShell).await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["app-shell-V1"]);
    }
}
