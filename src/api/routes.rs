//! API Routes
//!
//! Configures the Axum router: the `/__proxy` endpoints, with every other
//! path falling through to the intercept handler.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    control_handler, health_handler, intercept_handler, stats_handler, AppState,
};

/// Creates the main router.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/__proxy/control", post(control_handler))
        .route("/__proxy/stats", get(stats_handler))
        .route("/__proxy/health", get(health_handler))
        .fallback(intercept_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
