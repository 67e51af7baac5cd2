//! Keep-Alive Registry
//!
//! Every fire-and-forget store update is registered here. The host drains
//! the registry before tearing the process down; work that was never
//! registered would be lost silently when that happens.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tracks background work until it settles.
#[derive(Clone, Default)]
pub struct KeepAlive {
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work` and keeps it registered until it completes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&self, label: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Reap finished work so the set does not grow without bound.
        while pending.try_join_next().is_some() {}
        pending.spawn(work);
        debug!(task = label, pending = pending.len(), "Registered background work");
    }

    /// Number of registered tasks that have not been reaped yet.
    pub fn pending(&self) -> usize {
        match self.pending.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Waits until every registered task settles, including tasks
    /// registered while waiting.
    pub async fn settle(&self) {
        loop {
            let mut batch = {
                let mut pending = match self.pending.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                std::mem::take(&mut *pending)
            };
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Background work did not complete");
                }
            }
        }
    }
}

impl std::fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAlive")
            .field("pending", &self.pending())
            .finish()
    }
}
