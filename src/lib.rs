//! Offline Proxy - An offline-capable request-interception proxy
//!
//! Classifies outbound requests, answers them with a per-category caching
//! strategy backed by versioned cache stores, and coordinates safe upgrades
//! between builds through an install/activate lifecycle.

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod network;
pub mod strategy;
pub mod tasks;

pub use api::AppState;
pub use config::{EngineConfig, ServerConfig};
pub use error::{ProxyError, Result};
pub use lifecycle::{FetchOutcome, LifecycleState, SessionHost, Worker};
pub use tasks::{spawn_trim_task, KeepAlive};
