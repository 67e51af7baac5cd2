//! Runtime Trim Task
//!
//! Background task that periodically bounds the runtime store by entry
//! count and entry age. Other roles are never trimmed.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheRole, StoreRegistry};
use crate::config::EngineConfig;
use crate::error::Result;

/// Size and age bounds for the runtime store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimPolicy {
    /// Keep at most this many entries, dropping the oldest first
    pub max_entries: Option<usize>,
    /// Drop entries at least this old
    pub max_age: Option<Duration>,
}

impl TrimPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_entries: config.runtime_max_entries,
            max_age: config.runtime_max_age,
        }
    }

    /// Returns true when neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.max_entries.is_none() && self.max_age.is_none()
    }
}

/// Trims the runtime store once. Returns the number of entries removed.
pub async fn trim_runtime_store(registry: &StoreRegistry, policy: TrimPolicy) -> Result<usize> {
    if policy.is_unbounded() {
        return Ok(0);
    }

    let store = registry.resolve(CacheRole::Runtime).await?;
    let keys = store.keys_by_age().await?;
    let now = Utc::now();

    let expired = policy.max_age.map_or(0, |max_age| {
        keys.iter()
            .take_while(|(_, inserted_at)| {
                (now - *inserted_at).to_std().unwrap_or(Duration::ZERO) >= max_age
            })
            .count()
    });
    let over_limit = policy
        .max_entries
        .map_or(0, |max| keys.len().saturating_sub(max));
    let doomed = expired.max(over_limit);

    let mut removed = 0;
    for (key, _) in keys.iter().take(doomed) {
        if store.delete(key).await? {
            removed += 1;
        }
    }

    Ok(removed)
}

/// Spawns a background task that periodically trims the runtime store.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_trim_task(
    registry: StoreRegistry,
    policy: TrimPolicy,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            ?policy,
            "Starting runtime trim task"
        );

        loop {
            tokio::time::sleep(interval).await;

            match trim_runtime_store(&registry, policy).await {
                Ok(0) => debug!("Runtime trim: nothing to remove"),
                Ok(removed) => info!(removed, "Runtime trim: removed entries"),
                Err(e) => warn!(error = %e, "Runtime trim failed"),
            }
        }
    })
}
