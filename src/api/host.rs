//! Session host for the HTTP adapter.
//!
//! A single server process has one routing table, so claiming sessions is
//! immediate. Skipping the wait wakes an activation watcher that drives the
//! worker into its active state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::lifecycle::{LifecycleState, SessionHost, Worker};

#[derive(Debug, Default)]
pub struct ServerHost {
    activation: Notify,
}

impl ServerHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once an activation has been requested.
    pub async fn activation_requested(&self) {
        self.activation.notified().await;
    }
}

#[async_trait]
impl SessionHost for ServerHost {
    async fn skip_waiting(&self) {
        self.activation.notify_one();
    }

    async fn claim_sessions(&self) {
        info!("Sessions now routed through the active build");
    }
}

/// Spawns the task that activates the worker whenever the host is asked to
/// skip waiting. The task exits once the worker is active.
pub fn spawn_activation_watcher(worker: Arc<Worker>, host: Arc<ServerHost>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            host.activation_requested().await;

            match worker.activate().await {
                Ok(deleted) => {
                    info!(deleted, "Activation complete");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Activation failed, still waiting");
                    if worker.state().await != LifecycleState::Installed {
                        return;
                    }
                }
            }
        }
    })
}
