//! API Module
//!
//! axum host adapter: every inbound request becomes a fetch event, plus the
//! engine's own endpoints.
//!
//! # Endpoints
//! - `POST /__proxy/control` - Control channel (`FORCE_ACTIVATE`)
//! - `GET /__proxy/stats` - Engine counters
//! - `GET /__proxy/health` - Lifecycle state
//! - anything else - Intercepted or forwarded upstream

pub mod handlers;
pub mod host;
pub mod routes;

pub use handlers::*;
pub use host::{spawn_activation_watcher, ServerHost};
pub use routes::create_router;
