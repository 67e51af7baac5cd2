//! Configuration Module
//!
//! Handles loading the engine configuration and the host server settings
//! from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// When a navigation that was answered from a fallback gets refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationRevalidation {
    /// Only the next navigation to the same document hits the network again
    #[default]
    OnNextNavigation,
    /// The first successful network leg after a fallback refreshes every
    /// navigation that was served stale, in the background
    OnReconnect,
}

impl NavigationRevalidation {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "next" | "on-next-navigation" => Some(Self::OnNextNavigation),
            "reconnect" | "on-reconnect" => Some(Self::OnReconnect),
            _ => None,
        }
    }
}

/// Engine configuration, constructed once at startup and shared by every
/// component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Build identifier stamped into every store name
    pub build_version: String,
    /// The application's own origin
    pub origin: Url,
    /// Paths that must be precached for offline operation, in order
    pub core_assets: Vec<String>,
    /// Document served for navigations when nothing better is stored
    pub entry_document: String,
    /// Hosts serving live data; always passed through uncached
    pub bypass_hosts: Vec<String>,
    /// Path fragment identifying the near-real-time data directory
    pub realtime_dir: String,
    /// Extension of near-real-time data files
    pub realtime_extension: String,
    /// Deadline for navigation network legs
    pub navigation_timeout: Duration,
    /// Deadline for near-real-time data network legs
    pub realtime_timeout: Duration,
    /// Deadline for asset and image network legs
    pub asset_timeout: Duration,
    /// Deadline for requests forwarded without interception
    pub passthrough_timeout: Duration,
    /// Maximum number of entries kept in the runtime store
    pub runtime_max_entries: Option<usize>,
    /// Maximum age of entries kept in the runtime store
    pub runtime_max_age: Option<Duration>,
    /// Interval between runtime store trim passes
    pub trim_interval: Duration,
    /// Ask the host to skip the waiting phase as soon as install succeeds
    pub skip_waiting_on_install: bool,
    /// Refresh policy for navigations served from a fallback
    pub navigation_revalidation: NavigationRevalidation,
}

impl EngineConfig {
    /// Creates a new EngineConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PROXY_BUILD_VERSION` - Build identifier (default: crate version)
    /// - `PROXY_ORIGIN` - Application origin (default: `http://localhost:3000`)
    /// - `PROXY_CORE_ASSETS` - Comma-separated core asset paths
    /// - `PROXY_ENTRY_DOCUMENT` - Offline navigation fallback (default: `/index.html`)
    /// - `PROXY_BYPASS_HOSTS` - Comma-separated live-data hosts
    /// - `PROXY_REALTIME_DIR` - Near-real-time data directory (default: `/data/`)
    /// - `PROXY_NAVIGATION_TIMEOUT_MS`, `PROXY_REALTIME_TIMEOUT_MS`,
    ///   `PROXY_ASSET_TIMEOUT_MS`, `PROXY_PASSTHROUGH_TIMEOUT_MS` - Network deadlines
    /// - `PROXY_RUNTIME_MAX_ENTRIES`, `PROXY_RUNTIME_MAX_AGE_SECS` - Trimming thresholds
    /// - `PROXY_TRIM_INTERVAL_SECS` - Trim task interval (default: 60)
    /// - `PROXY_SKIP_WAITING_ON_INSTALL` - `true` to activate right after install
    /// - `PROXY_NAVIGATION_REVALIDATION` - `next` or `reconnect`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            build_version: env::var("PROXY_BUILD_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.build_version),
            origin: env::var("PROXY_ORIGIN")
                .ok()
                .and_then(|v| Url::parse(&v).ok())
                .unwrap_or(defaults.origin),
            core_assets: env_list("PROXY_CORE_ASSETS").unwrap_or(defaults.core_assets),
            entry_document: env::var("PROXY_ENTRY_DOCUMENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.entry_document),
            bypass_hosts: env_list("PROXY_BYPASS_HOSTS").unwrap_or(defaults.bypass_hosts),
            realtime_dir: env::var("PROXY_REALTIME_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.realtime_dir),
            realtime_extension: env::var("PROXY_REALTIME_EXTENSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.realtime_extension),
            navigation_timeout: env_millis("PROXY_NAVIGATION_TIMEOUT_MS")
                .unwrap_or(defaults.navigation_timeout),
            realtime_timeout: env_millis("PROXY_REALTIME_TIMEOUT_MS")
                .unwrap_or(defaults.realtime_timeout),
            asset_timeout: env_millis("PROXY_ASSET_TIMEOUT_MS").unwrap_or(defaults.asset_timeout),
            passthrough_timeout: env_millis("PROXY_PASSTHROUGH_TIMEOUT_MS")
                .unwrap_or(defaults.passthrough_timeout),
            runtime_max_entries: env::var("PROXY_RUNTIME_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(defaults.runtime_max_entries),
            runtime_max_age: env::var("PROXY_RUNTIME_MAX_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .or(defaults.runtime_max_age),
            trim_interval: env::var("PROXY_TRIM_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.trim_interval),
            skip_waiting_on_install: env::var("PROXY_SKIP_WAITING_ON_INSTALL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.skip_waiting_on_install),
            navigation_revalidation: env::var("PROXY_NAVIGATION_REVALIDATION")
                .ok()
                .and_then(|v| NavigationRevalidation::parse(&v))
                .unwrap_or(defaults.navigation_revalidation),
        }
    }

    /// Resolves a configured path against the application origin.
    pub fn resolve(&self, path: &str) -> Option<Url> {
        self.origin.join(path).ok()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            build_version: format!("v{}", env!("CARGO_PKG_VERSION")),
            origin: Url::parse("http://localhost:3000").expect("static origin is valid"),
            core_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.webmanifest".to_string(),
                "/icon-192.svg".to_string(),
                "/icon-512.svg".to_string(),
            ],
            entry_document: "/index.html".to_string(),
            bypass_hosts: Vec::new(),
            realtime_dir: "/data/".to_string(),
            realtime_extension: ".json".to_string(),
            navigation_timeout: Duration::from_millis(4000),
            realtime_timeout: Duration::from_millis(3000),
            asset_timeout: Duration::from_millis(8000),
            passthrough_timeout: Duration::from_secs(30),
            runtime_max_entries: Some(200),
            runtime_max_age: None,
            trim_interval: Duration::from_secs(60),
            skip_waiting_on_install: false,
            navigation_revalidation: NavigationRevalidation::OnNextNavigation,
        }
    }
}

/// Host server settings, used by the binary only.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server port
    pub server_port: u16,
    /// Upstream origin every network leg is forwarded to
    pub upstream: Url,
    /// Hard ceiling for upstream requests, above any per-category deadline
    pub upstream_timeout: Duration,
    /// Directory holding the cache stores. `None` keeps them in memory.
    pub store_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Loads `SERVER_PORT`, `PROXY_UPSTREAM`, `PROXY_UPSTREAM_TIMEOUT_MS` and
    /// `PROXY_STORE_DIR`. An empty `PROXY_STORE_DIR` selects memory stores.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            upstream: env::var("PROXY_UPSTREAM")
                .ok()
                .and_then(|v| Url::parse(&v).ok())
                .unwrap_or(defaults.upstream),
            upstream_timeout: env_millis("PROXY_UPSTREAM_TIMEOUT_MS")
                .unwrap_or(defaults.upstream_timeout),
            store_dir: match env::var("PROXY_STORE_DIR") {
                Ok(dir) if dir.trim().is_empty() => None,
                Ok(dir) => Some(PathBuf::from(dir)),
                Err(_) => defaults.store_dir,
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            upstream: Url::parse("http://127.0.0.1:8080").expect("static upstream is valid"),
            upstream_timeout: Duration::from_secs(30),
            store_dir: Some(PathBuf::from("proxy-store")),
        }
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
