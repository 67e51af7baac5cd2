//! Strategy Engine
//!
//! The caching strategies, each a sequence of store and network steps that
//! always ends in a response:
//!
//! - network-first: navigations and near-real-time data
//! - stale-while-revalidate: static assets and everything else same-origin
//! - cache-first: images
//! - bypass: forwarded verbatim, never inspected or stored
//!
//! Only successful responses are ever written to a store. Store failures
//! degrade to a miss on read and are swallowed on write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheRole, EngineStats, StoreHandle, StoreRegistry};
use crate::classify::RequestCategory;
use crate::config::{EngineConfig, NavigationRevalidation};
use crate::error::Result;
use crate::models::{ProxyRequest, ProxyResponse, ResponseSource};
use crate::network::{BoundedNetwork, FetchMode};
use crate::tasks::KeepAlive;

// == Strategy ==
/// Named caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NetworkFirst,
    StaleWhileRevalidate,
    CacheFirst,
    Bypass,
}

impl Strategy {
    pub fn for_category(category: RequestCategory) -> Self {
        match category {
            RequestCategory::Navigation | RequestCategory::RealtimeData => Strategy::NetworkFirst,
            RequestCategory::StaticAsset | RequestCategory::Other => {
                Strategy::StaleWhileRevalidate
            }
            RequestCategory::Image => Strategy::CacheFirst,
            RequestCategory::Bypass => Strategy::Bypass,
        }
    }
}

/// Network deadlines per category.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub navigation: Duration,
    pub realtime: Duration,
    pub asset: Duration,
    pub passthrough: Duration,
}

impl Deadlines {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            navigation: config.navigation_timeout,
            realtime: config.realtime_timeout,
            asset: config.asset_timeout,
            passthrough: config.passthrough_timeout,
        }
    }

    fn for_category(&self, category: RequestCategory) -> Duration {
        match category {
            RequestCategory::Navigation => self.navigation,
            RequestCategory::RealtimeData => self.realtime,
            RequestCategory::Bypass => self.passthrough,
            RequestCategory::Image | RequestCategory::StaticAsset | RequestCategory::Other => {
                self.asset
            }
        }
    }
}

// == Strategy Engine ==
/// Executes strategies against the stores of one build.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    registry: StoreRegistry,
    network: BoundedNetwork,
    stats: Arc<EngineStats>,
    keepalive: KeepAlive,
    deadlines: Deadlines,
    entry_document: Option<Url>,
    revalidation: NavigationRevalidation,
    stale_navigations: Arc<Mutex<HashMap<String, ProxyRequest>>>,
}

impl StrategyEngine {
    pub fn new(
        config: &EngineConfig,
        registry: StoreRegistry,
        network: BoundedNetwork,
        stats: Arc<EngineStats>,
        keepalive: KeepAlive,
    ) -> Self {
        Self {
            registry,
            network,
            stats,
            keepalive,
            deadlines: Deadlines::from_config(config),
            entry_document: config.resolve(&config.entry_document),
            revalidation: config.navigation_revalidation,
            stale_navigations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Produces the response for an intercepted request.
    pub async fn respond(&self, request: &ProxyRequest, category: RequestCategory) -> ProxyResponse {
        let strategy = Strategy::for_category(category);
        let response = match (strategy, CacheRole::for_category(category)) {
            (Strategy::NetworkFirst, Some(role)) => {
                self.network_first(request, category, role).await
            }
            (Strategy::StaleWhileRevalidate, Some(role)) => {
                self.stale_while_revalidate(request, category, role).await
            }
            (Strategy::CacheFirst, Some(role)) => self.cache_first(request, category, role).await,
            _ => match self.bypass(request).await {
                Ok(response) => response,
                Err(_) => ProxyResponse::gone(),
            },
        };

        debug!(
            url = %request.url,
            %category,
            ?strategy,
            status = response.status,
            source = response.source.as_str(),
            "Responded"
        );
        response
    }

    // == Network First ==
    /// Fresh from the network when possible, the stored copy otherwise.
    ///
    /// Navigations treat a non-success status as a failure; data requests
    /// return it as-is (uncached).
    pub async fn network_first(
        &self,
        request: &ProxyRequest,
        category: RequestCategory,
        role: CacheRole,
    ) -> ProxyResponse {
        let key = request.cache_key();
        let navigation = category == RequestCategory::Navigation;
        let deadline = self.deadlines.for_category(category);

        let failed = match self.network.fetch(request, FetchMode::NoStore, deadline).await {
            Ok(response) if response.ok() => {
                self.stats.record_network();
                if let Some(store) = self.open(role).await {
                    self.persist(&store, &key, &response).await;
                }
                self.forget_stale(&key);
                self.after_network_success();
                return response;
            }
            Ok(response) if !navigation => {
                self.stats.record_network();
                self.after_network_success();
                return response;
            }
            Ok(response) => Some(response),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-first leg failed");
                None
            }
        };

        if let Some(cached) = self.lookup(role, &key).await {
            self.stats.record_fallback();
            if navigation {
                self.remember_stale(&key, request);
            }
            return cached;
        }

        if navigation {
            if let Some(document) = self.entry_document_response(role).await {
                self.stats.record_fallback();
                self.remember_stale(&key, request);
                return document;
            }
            if let Some(response) = failed {
                // An error page from the server beats a synthetic one.
                return response;
            }
            self.stats.record_synthetic();
            self.remember_stale(&key, request);
            return ProxyResponse::offline_document();
        }

        self.stats.record_synthetic();
        warn!(url = %request.url, "No stored data, answering unavailable");
        ProxyResponse::unavailable_data()
    }

    // == Stale While Revalidate ==
    /// The stored copy immediately, refreshed in the background.
    pub async fn stale_while_revalidate(
        &self,
        request: &ProxyRequest,
        category: RequestCategory,
        role: CacheRole,
    ) -> ProxyResponse {
        let key = request.cache_key();
        let deadline = self.deadlines.for_category(category);

        if let Some(cached) = self.lookup(role, &key).await {
            self.revalidate_in_background(request.clone(), role, deadline);
            return cached;
        }

        self.fetch_and_store(request, role, deadline).await
    }

    // == Cache First ==
    /// The stored copy if any, with no background refresh.
    pub async fn cache_first(
        &self,
        request: &ProxyRequest,
        category: RequestCategory,
        role: CacheRole,
    ) -> ProxyResponse {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(role, &key).await {
            return cached;
        }

        let deadline = self.deadlines.for_category(category);
        self.fetch_and_store(request, role, deadline).await
    }

    // == Bypass ==
    /// Forwards the request verbatim. Never reads or writes a store.
    pub async fn bypass(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let deadline = self.deadlines.for_category(RequestCategory::Bypass);
        self.network
            .fetch(request, FetchMode::Default, deadline)
            .await
    }

    // == Helpers ==
    /// Waits on the network for a miss, storing a successful response.
    async fn fetch_and_store(
        &self,
        request: &ProxyRequest,
        role: CacheRole,
        deadline: Duration,
    ) -> ProxyResponse {
        match self.network.fetch(request, FetchMode::Default, deadline).await {
            Ok(response) => {
                self.stats.record_network();
                if response.ok() {
                    if let Some(store) = self.open(role).await {
                        self.persist(&store, &request.cache_key(), &response).await;
                    }
                    self.after_network_success();
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Miss and network unavailable");
                self.stats.record_synthetic();
                ProxyResponse::gone()
            }
        }
    }

    fn revalidate_in_background(&self, request: ProxyRequest, role: CacheRole, deadline: Duration) {
        let engine = self.clone();
        self.keepalive.wait_until("revalidate", async move {
            let key = request.cache_key();
            match engine
                .network
                .fetch(&request, FetchMode::Default, deadline)
                .await
            {
                Ok(response) if response.ok() => {
                    if let Some(store) = engine.open(role).await {
                        if engine.persist(&store, &key, &response).await {
                            engine.stats.record_background_update();
                        }
                    }
                    engine.after_network_success();
                }
                Ok(response) => {
                    debug!(url = %request.url, status = response.status, "Revalidation not stored");
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Revalidation failed, keeping entry");
                }
            }
        });
    }

    /// Opens a role's store. Failures are logged and treated as absent.
    async fn open(&self, role: CacheRole) -> Option<StoreHandle> {
        match self.registry.resolve(role).await {
            Ok(store) => Some(store),
            Err(e) => {
                self.stats.record_store_error();
                warn!(%role, error = %e, "Store unavailable");
                None
            }
        }
    }

    /// Reads a key from the role's store, then from the app shell.
    async fn lookup(&self, role: CacheRole, key: &str) -> Option<ProxyResponse> {
        let mut roles = vec![role];
        if role != CacheRole::AppShell {
            roles.push(CacheRole::AppShell);
        }

        for role in roles {
            let Some(store) = self.open(role).await else {
                continue;
            };
            match store.get(key).await {
                Ok(Some(entry)) => {
                    self.stats.record_hit();
                    return Some(entry.into_response());
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.record_store_error();
                    warn!(%role, key, error = %e, "Store read failed, treating as miss");
                }
            }
        }

        self.stats.record_miss();
        None
    }

    /// Writes a successful response. Returns whether it was stored.
    async fn persist(&self, store: &StoreHandle, key: &str, response: &ProxyResponse) -> bool {
        if !response.ok() {
            return false;
        }
        // Stored entries are replayed to every client.
        if response.header("set-cookie").is_some() {
            debug!(store = store.name(), key, "Response sets a cookie, not stored");
            return false;
        }
        match store.put(key, response.clone()).await {
            Ok(()) => true,
            Err(e) => {
                self.stats.record_store_error();
                warn!(store = store.name(), key, error = %e, "Store write failed, response still served");
                false
            }
        }
    }

    async fn entry_document_response(&self, role: CacheRole) -> Option<ProxyResponse> {
        let url = self.entry_document.as_ref()?;
        let mut key = url.clone();
        key.set_fragment(None);
        self.lookup(role, key.as_str())
            .await
            .map(|response| response.with_source(ResponseSource::Fallback))
    }

    // == Navigation Revalidation ==
    fn remember_stale(&self, key: &str, request: &ProxyRequest) {
        if self.revalidation != NavigationRevalidation::OnReconnect {
            return;
        }
        self.stale_set().insert(key.to_string(), request.clone());
    }

    fn forget_stale(&self, key: &str) {
        self.stale_set().remove(key);
    }

    /// The remembered navigations. A panic elsewhere never loses them.
    fn stale_set(&self) -> MutexGuard<'_, HashMap<String, ProxyRequest>> {
        self.stale_navigations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refreshes navigations that were served from a fallback, once the
    /// network is back.
    fn after_network_success(&self) {
        if self.revalidation != NavigationRevalidation::OnReconnect {
            return;
        }
        let pending: Vec<ProxyRequest> = self
            .stale_set()
            .drain()
            .map(|(_, request)| request)
            .collect();

        for request in pending {
            let engine = self.clone();
            let deadline = self.deadlines.navigation;
            self.keepalive.wait_until("reconnect-revalidate", async move {
                let key = request.cache_key();
                match engine
                    .network
                    .fetch(&request, FetchMode::NoStore, deadline)
                    .await
                {
                    Ok(response) if response.ok() => {
                        if let Some(store) = engine.open(CacheRole::Pages).await {
                            if engine.persist(&store, &key, &response).await {
                                engine.stats.record_background_update();
                            }
                        }
                    }
                    _ => engine.remember_stale(&key, &request),
                }
            });
        }
    }
}
