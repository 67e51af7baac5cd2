//! Lifecycle Coordinator
//!
//! Drives one engine instance through `installing -> installed(waiting) ->
//! activating -> active`, and exposes the [`Worker`] facade the host feeds
//! with install, activate, message and fetch events.
//!
//! ### Guarantees
//! - Install precaches the whole core asset set or nothing at all.
//! - Reconciliation finishes before the instance serves its first fetch.
//! - An instance that is not active never intercepts; the host's default
//!   network behaviour applies instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheRole, CacheStorage, EngineStats, StoreRegistry};
use crate::classify::RequestClassifier;
use crate::config::EngineConfig;
use crate::error::{ProxyError, Result};
use crate::models::{ControlMessage, ProxyRequest, ProxyResponse};
use crate::network::{BoundedNetwork, FetchMode, Fetcher};
use crate::strategy::StrategyEngine;
use crate::tasks::KeepAlive;

/// Attempts made at reconciliation before an activation is abandoned.
const RECONCILE_ATTEMPTS: u32 = 3;
const RECONCILE_BACKOFF: Duration = Duration::from_millis(50);

// == Lifecycle State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    /// Installed and waiting for open sessions to close
    Installed,
    Activating,
    Active,
    /// Install failed; the host discards this instance
    Redundant,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Session Host ==
/// Session operations supplied by the host runtime.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Skip the remaining wait and activate the waiting instance now.
    async fn skip_waiting(&self);

    /// Route every open session through this instance.
    async fn claim_sessions(&self);
}

/// What the host should do with an intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Substitute this response for the default network behaviour
    Respond(ProxyResponse),
    /// Leave the request to the default network behaviour
    Passthrough,
}

// == Worker ==
/// One engine instance, bound to a single build version.
pub struct Worker {
    config: EngineConfig,
    classifier: RequestClassifier,
    registry: StoreRegistry,
    network: BoundedNetwork,
    strategies: StrategyEngine,
    stats: Arc<EngineStats>,
    keepalive: KeepAlive,
    host: Arc<dyn SessionHost>,
    state: RwLock<LifecycleState>,
    update_pending: AtomicBool,
    transition: Mutex<()>,
}

impl Worker {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        host: Arc<dyn SessionHost>,
    ) -> Self {
        let stats = Arc::new(EngineStats::new());
        let keepalive = KeepAlive::new();
        let registry = StoreRegistry::new(storage, config.build_version.clone());
        let network = BoundedNetwork::new(fetcher, stats.clone());
        let strategies = StrategyEngine::new(
            &config,
            registry.clone(),
            network.clone(),
            stats.clone(),
            keepalive.clone(),
        );

        Self {
            classifier: RequestClassifier::new(&config),
            config,
            registry,
            network,
            strategies,
            stats,
            keepalive,
            host,
            state: RwLock::new(LifecycleState::Installing),
            update_pending: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// True while this build is installed and waiting to activate.
    pub fn update_pending(&self) -> bool {
        self.update_pending.load(Ordering::SeqCst)
    }

    /// True if a request for this URL may be handled or forwarded at all.
    pub fn accepts_target(&self, url: &Url) -> bool {
        self.classifier.is_known_target(url)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn keepalive(&self) -> &KeepAlive {
        &self.keepalive
    }

    async fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.write().await;
        debug!(from = %*state, to = %next, "Lifecycle transition");
        *state = next;
    }

    async fn expect_state(&self, expected: LifecycleState) -> Result<()> {
        let actual = self.state().await;
        if actual == expected {
            Ok(())
        } else {
            Err(ProxyError::InvalidState {
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    // == Install ==
    /// Precaches the core asset set into the app-shell store.
    ///
    /// Every asset is fetched before anything is written. A single failed
    /// fetch or non-success status aborts the install with nothing stored
    /// and leaves the instance redundant.
    pub async fn install(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Installing).await?;

        let total = self.config.core_assets.len();
        info!(
            version = %self.registry.version(),
            assets = total,
            "Installing"
        );

        let mut fetches = JoinSet::new();
        for (index, path) in self.config.core_assets.iter().enumerate() {
            let Some(url) = self.config.resolve(path) else {
                warn!(path = %path, "Core asset path does not resolve");
                continue;
            };
            let network = self.network.clone();
            let deadline = self.config.asset_timeout;
            fetches.spawn(async move {
                let request = ProxyRequest::from_url("GET", url);
                let result = network.fetch(&request, FetchMode::Reload, deadline).await;
                (index, request, result)
            });
        }

        let mut fetched = Vec::with_capacity(total);
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((index, request, Ok(response))) if response.ok() => {
                    fetched.push((index, request.cache_key(), response));
                }
                Ok((_, request, Ok(response))) => {
                    warn!(url = %request.url, status = response.status, "Core asset not ok");
                }
                Ok((_, request, Err(e))) => {
                    warn!(url = %request.url, error = %e, "Core asset fetch failed");
                }
                Err(e) => warn!(error = %e, "Core asset fetch aborted"),
            }
        }

        if fetched.len() < total {
            let failed = total - fetched.len();
            self.set_state(LifecycleState::Redundant).await;
            warn!(failed, total, "Install incomplete, nothing stored");
            return Err(ProxyError::InstallIncomplete { failed, total });
        }
        fetched.sort_by_key(|(index, _, _)| *index);

        if let Err(e) = self.store_core_assets(&fetched).await {
            self.set_state(LifecycleState::Redundant).await;
            warn!(error = %e, "Install aborted while writing core assets");
            return Err(e);
        }

        self.update_pending.store(true, Ordering::SeqCst);
        self.set_state(LifecycleState::Installed).await;
        info!(version = %self.registry.version(), "Installed, waiting to activate");

        if self.config.skip_waiting_on_install {
            self.host.skip_waiting().await;
        }
        Ok(())
    }

    /// Writes the fetched core assets. A failed write drops this build's
    /// whole app-shell store, which only this install attempt owns.
    async fn store_core_assets(
        &self,
        fetched: &[(usize, String, ProxyResponse)],
    ) -> Result<()> {
        let store = self.registry.resolve(CacheRole::AppShell).await?;

        for (_, key, response) in fetched {
            if let Err(e) = store.put(key, response.clone()).await {
                self.stats.record_store_error();
                drop(store);
                if let Err(discard) = self.registry.discard(CacheRole::AppShell).await {
                    warn!(
                        store = %self.registry.name_for(CacheRole::AppShell),
                        error = %discard,
                        "Failed to drop partially written app shell"
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }

    // == Activate ==
    /// Deletes superseded stores, then claims every open session.
    ///
    /// Returns the number of stores deleted. If reconciliation keeps
    /// failing, the instance goes back to waiting and the error is returned.
    pub async fn activate(&self) -> Result<usize> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Installed).await?;
        self.set_state(LifecycleState::Activating).await;

        let version = self.registry.version().to_string();
        let mut attempt = 0;
        let deleted = loop {
            attempt += 1;
            match self.registry.reconcile_on_activate(&version).await {
                Ok(deleted) => break deleted,
                Err(e) if attempt < RECONCILE_ATTEMPTS => {
                    warn!(attempt, error = %e, "Reconciliation failed, retrying");
                    tokio::time::sleep(RECONCILE_BACKOFF * attempt).await;
                }
                Err(e) => {
                    self.set_state(LifecycleState::Installed).await;
                    warn!(attempt, error = %e, "Reconciliation failed, activation abandoned");
                    return Err(e);
                }
            }
        };

        self.update_pending.store(false, Ordering::SeqCst);
        self.set_state(LifecycleState::Active).await;
        self.host.claim_sessions().await;
        info!(%version, deleted, "Activated");
        Ok(deleted)
    }

    // == Messages ==
    /// Handles a control message. Returns whether it had any effect.
    pub async fn handle_message(&self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::ForceActivate => {
                let state = self.state().await;
                if state != LifecycleState::Installed || !self.update_pending() {
                    debug!(%state, "FORCE_ACTIVATE ignored");
                    return false;
                }
                info!("FORCE_ACTIVATE received, skipping wait");
                self.host.skip_waiting().await;
                true
            }
        }
    }

    // == Fetch ==
    /// Handles a request event.
    pub async fn handle_fetch(&self, request: &ProxyRequest) -> FetchOutcome {
        let classification = self.classifier.classify(request);
        if !classification.intercept {
            debug!(url = %request.url, reason = ?classification.bypass, "Not intercepted");
            return FetchOutcome::Passthrough;
        }

        let state = self.state().await;
        if state != LifecycleState::Active {
            debug!(url = %request.url, %state, "Not active, passing through");
            return FetchOutcome::Passthrough;
        }

        let response = self
            .strategies
            .respond(request, classification.category)
            .await;
        FetchOutcome::Respond(response)
    }

    /// Forwards a request without interception.
    pub async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        self.strategies.bypass(request).await
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("version", &self.registry.version())
            .field("update_pending", &self.update_pending())
            .finish_non_exhaustive()
    }
}
