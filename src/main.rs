//! Offline Proxy - An offline-capable request-interception proxy
//!
//! Runs the engine behind an HTTP server that forwards network legs to an
//! upstream origin.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_proxy::api::{create_router, spawn_activation_watcher, AppState, ServerHost};
use offline_proxy::cache::{CacheStorage, FsStorage, MemoryStorage};
use offline_proxy::network::HttpFetcher;
use offline_proxy::tasks::TrimPolicy;
use offline_proxy::{spawn_trim_task, EngineConfig, ServerConfig, SessionHost, Worker};

/// Main entry point for the proxy server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache stores (on disk unless `PROXY_STORE_DIR` is empty)
/// 4. Install the build (precache the core asset set)
/// 5. Activate right away unless another build's stores are still present
/// 6. Start the runtime trim task
/// 7. Serve until SIGINT/SIGTERM, then drain pending background work
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offline_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Offline Proxy");

    let engine = EngineConfig::from_env();
    let server = ServerConfig::from_env();
    info!(
        version = %engine.build_version,
        origin = %engine.origin,
        upstream = %server.upstream,
        port = server.server_port,
        core_assets = engine.core_assets.len(),
        "Configuration loaded"
    );

    let fetcher = HttpFetcher::new(
        engine.origin.clone(),
        server.upstream.clone(),
        server.upstream_timeout,
    )
    .context("failed to build upstream client")?;
    let storage: Arc<dyn CacheStorage> = match &server.store_dir {
        Some(dir) => {
            let storage = FsStorage::create(dir)
                .await
                .with_context(|| format!("failed to open store directory {}", dir.display()))?;
            info!(dir = %dir.display(), "Using persistent cache stores");
            Arc::new(storage)
        }
        None => {
            warn!("PROXY_STORE_DIR is empty, cache stores will not survive a restart");
            Arc::new(MemoryStorage::new())
        }
    };

    let host = Arc::new(ServerHost::new());
    let worker = Arc::new(Worker::new(
        engine.clone(),
        storage,
        Arc::new(fetcher),
        host.clone(),
    ));

    let watcher = spawn_activation_watcher(worker.clone(), host.clone());

    match worker.install().await {
        Ok(()) => {
            let superseded = worker.registry().superseded().await.unwrap_or_default();
            if superseded.is_empty() {
                // Nothing older is serving; no session to wait for.
                host.skip_waiting().await;
            } else {
                info!(
                    stores = superseded.len(),
                    "Previous build present, waiting for FORCE_ACTIVATE"
                );
            }
        }
        Err(e) => warn!(error = %e, "Install failed, forwarding requests uncached"),
    }

    let trim_handle = spawn_trim_task(
        worker.registry().clone(),
        TrimPolicy::from_config(&engine),
        engine.trim_interval,
    );
    info!("Background trim task started");

    let app = create_router(AppState::new(worker.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], server.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(vec![trim_handle, watcher]))
        .await
        .context("server error")?;

    let pending = worker.keepalive().pending();
    if pending > 0 {
        info!(pending, "Waiting for background updates to settle");
    }
    worker.keepalive().settle().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the
/// background tasks.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for task in tasks {
        task.abort();
    }
    warn!("Background tasks aborted");
}
