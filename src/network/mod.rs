//! Network Module
//!
//! The host's network leg and the bounded accessor every strategy goes
//! through.
//!
//! ### Deadlines
//! - Every fetch settles with a response or a failure within its deadline.
//! - An elapsed deadline fails with `ProxyError::Timeout`, distinct from a
//!   connection failure; strategies treat both as "network unavailable".
//! - A timed-out fetch is abandoned, not cancelled: it keeps running on its
//!   own task and its eventual result is dropped.

mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::EngineStats;
use crate::error::{ProxyError, Result};
use crate::models::{ProxyRequest, ProxyResponse, ResponseSource};

pub use http::HttpFetcher;

/// How the network leg may use intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Normal HTTP caching
    Default,
    /// Do not store the response in any intermediate cache
    NoStore,
    /// Skip intermediate caches and fetch a fresh copy
    Reload,
}

// == Fetcher Trait ==
/// A raw network fetch, supplied by the host.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the request. Connection failures map to
    /// `ProxyError::NetworkUnavailable`; any HTTP status is a response.
    async fn fetch(&self, request: &ProxyRequest, mode: FetchMode) -> Result<ProxyResponse>;
}

// == Bounded Network ==
/// Wraps a [`Fetcher`] with deadlines and a uniform failure outcome.
#[derive(Clone)]
pub struct BoundedNetwork {
    fetcher: Arc<dyn Fetcher>,
    stats: Arc<EngineStats>,
}

impl BoundedNetwork {
    pub fn new(fetcher: Arc<dyn Fetcher>, stats: Arc<EngineStats>) -> Self {
        Self { fetcher, stats }
    }

    /// Fetches with a deadline.
    pub async fn fetch(
        &self,
        request: &ProxyRequest,
        mode: FetchMode,
        deadline: Duration,
    ) -> Result<ProxyResponse> {
        let fetcher = self.fetcher.clone();
        let owned = request.clone();
        let task = tokio::spawn(async move { fetcher.fetch(&owned, mode).await });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(response))) => {
                debug!(url = %request.url, status = response.status, "Network leg settled");
                Ok(response.with_source(ResponseSource::Network))
            }
            Ok(Ok(Err(e))) => {
                self.stats.record_network_error();
                warn!(url = %request.url, error = %e, "Network leg failed");
                if e.is_network() {
                    Err(e)
                } else {
                    Err(ProxyError::NetworkUnavailable(e.to_string()))
                }
            }
            Ok(Err(join_error)) => {
                self.stats.record_network_error();
                warn!(url = %request.url, error = %join_error, "Network task aborted");
                Err(ProxyError::NetworkUnavailable(join_error.to_string()))
            }
            Err(_) => {
                self.stats.record_timeout();
                let after_ms = deadline.as_millis() as u64;
                warn!(url = %request.url, after_ms, "Network leg timed out");
                Err(ProxyError::Timeout { after_ms })
            }
        }
    }
}

impl std::fmt::Debug for BoundedNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedNetwork").finish_non_exhaustive()
    }
}
