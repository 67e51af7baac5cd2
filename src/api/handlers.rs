//! API Handlers
//!
//! The intercept handler turns every inbound HTTP request into a fetch
//! event. The `/__proxy/*` handlers expose the control channel and the
//! engine's own observability.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::lifecycle::{FetchOutcome, Worker};
use crate::models::{
    ControlMessage, ControlResponse, HealthResponse, ProxyRequest, ProxyResponse, StatsResponse,
};

/// Header naming where a response came from.
pub const SOURCE_HEADER: &str = "x-proxy-source";

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<Worker>,
}

impl AppState {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }
}

/// Fallback handler for every path outside `/__proxy`.
///
/// Intercepted requests are answered by the worker; everything else is
/// forwarded verbatim.
pub async fn intercept_handler(State(state): State<AppState>, request: Request) -> Response {
    let request = match to_proxy_request(&state.worker, request).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let response = match state.worker.handle_fetch(&request).await {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => match state.worker.forward(&request).await {
            Ok(response) => response,
            Err(e) => return e.into_response(),
        },
    };

    into_http_response(response)
}

/// Handler for POST /__proxy/control
///
/// Accepts `{"type":"FORCE_ACTIVATE"}` or the bare message string.
pub async fn control_handler(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ControlResponse>> {
    let message = serde_json::from_str::<ControlMessage>(&body)
        .or_else(|_| ControlMessage::parse(&body))?;

    let accepted = state.worker.handle_message(message).await;
    let lifecycle = state.worker.state().await;

    Ok(Json(ControlResponse::new(accepted, lifecycle.as_str())))
}

/// Handler for GET /__proxy/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let worker = &state.worker;
    let lifecycle = worker.state().await;

    Json(StatsResponse::new(
        worker.registry().version(),
        lifecycle.as_str(),
        worker.stats().snapshot(),
    ))
}

/// Handler for GET /__proxy/health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let lifecycle = state.worker.state().await;
    Json(HealthResponse::new(lifecycle.as_str()))
}

// == Conversions ==

/// Builds the request descriptor for an inbound HTTP request.
///
/// Origin-form targets are resolved against the application origin.
/// Absolute-form targets are kept as sent, but only for the application
/// origin and the denylisted hosts.
async fn to_proxy_request(worker: &Worker, request: Request) -> Result<ProxyRequest> {
    let (parts, body) = request.into_parts();

    let target = parts.uri.to_string();
    let parsed = if parts.uri.scheme().is_some() {
        url::Url::parse(&target)
    } else {
        worker.config().origin.join(&target)
    };
    let url = parsed
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid target '{}': {}", target, e)))?;
    if !worker.accepts_target(&url) {
        return Err(ProxyError::InvalidRequest(format!(
            "target host not served here: {}",
            url.host_str().unwrap_or_default()
        )));
    }

    let mut proxy_request = ProxyRequest::from_url(parts.method.as_str(), url);

    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        proxy_request = if *name == header::ACCEPT {
            proxy_request.with_accept(value)
        } else if name == "sec-fetch-mode" {
            if value == "navigate" {
                proxy_request.navigation()
            } else {
                proxy_request
            }
        } else if name == "sec-fetch-dest" {
            if value == "empty" {
                proxy_request
            } else {
                proxy_request.with_destination(value)
            }
        } else {
            proxy_request.with_header(name.as_str(), value)
        };
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("unreadable body: {}", e)))?;

    debug!(method = %proxy_request.method, url = %proxy_request.url, "Inbound request");
    Ok(proxy_request.with_body(body))
}

/// Converts an engine response into an HTTP response.
fn into_http_response(response: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers.insert(
        SOURCE_HEADER,
        HeaderValue::from_static(response.source.as_str()),
    );

    (status, headers, Body::from(response.body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use url::Url;

    use crate::cache::MemoryStorage;
    use crate::config::EngineConfig;
    use crate::lifecycle::{LifecycleState, SessionHost};
    use crate::network::testing::ScriptedFetcher;

    struct NoopHost;

    #[async_trait]
    impl SessionHost for NoopHost {
        async fn skip_waiting(&self) {}
        async fn claim_sessions(&self) {}
    }

    fn test_state() -> (AppState, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("https://app.test/", 200, "root");
        let config = EngineConfig {
            build_version: "v1".to_string(),
            origin: Url::parse("https://app.test").unwrap(),
            core_assets: vec!["/".to_string()],
            ..EngineConfig::default()
        };
        let worker = Worker::new(
            config,
            Arc::new(MemoryStorage::new()),
            fetcher.clone(),
            Arc::new(NoopHost),
        );
        (AppState::new(Arc::new(worker)), fetcher)
    }

    #[tokio::test]
    async fn test_control_handler_accepts_json_and_bare_messages() {
        let (state, _) = test_state();
        state.worker.install().await.unwrap();

        let json = control_handler(State(state.clone()), r#"{"type":"FORCE_ACTIVATE"}"#.into())
            .await
            .unwrap();
        assert!(json.accepted);
        assert_eq!(json.state, "installed");

        let bare = control_handler(State(state), "SKIP_WAITING".into())
            .await
            .unwrap();
        assert!(bare.accepted);
    }

    #[tokio::test]
    async fn test_control_handler_rejects_unknown_message() {
        let (state, _) = test_state();

        let result = control_handler(State(state), r#"{"type":"RELOAD"}"#.into()).await;
        assert!(matches!(result, Err(ProxyError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_health_handler_reports_state() {
        let (state, _) = test_state();

        let starting = health_handler(State(state.clone())).await;
        assert_eq!(starting.status, "starting");

        state.worker.install().await.unwrap();
        state.worker.activate().await.unwrap();
        let healthy = health_handler(State(state.clone())).await;
        assert_eq!(healthy.status, "healthy");
        assert_eq!(state.worker.state().await, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let (state, _) = test_state();

        let stats = stats_handler(State(state)).await;
        assert_eq!(stats.build_version, "v1");
        assert_eq!(stats.counters.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_to_proxy_request_reads_navigation_headers() {
        let (state, _) = test_state();
        let request = Request::builder()
            .uri("/reports/?page=2")
            .header("accept", "text/html")
            .header("sec-fetch-mode", "navigate")
            .header("sec-fetch-dest", "document")
            .header("x-trace", "abc")
            .body(Body::empty())
            .unwrap();

        let proxy_request = to_proxy_request(&state.worker, request).await.unwrap();

        assert_eq!(proxy_request.url.as_str(), "https://app.test/reports/?page=2");
        assert!(proxy_request.navigate);
        assert_eq!(proxy_request.accept.as_deref(), Some("text/html"));
        assert_eq!(proxy_request.destination.as_deref(), Some("document"));
        assert_eq!(
            proxy_request.headers,
            vec![("x-trace".to_string(), "abc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_to_proxy_request_keeps_absolute_targets() {
        let (state, _) = test_state();
        let request = Request::builder()
            .uri("https://app.test/lib.js?v=3")
            .body(Body::empty())
            .unwrap();

        let proxy_request = to_proxy_request(&state.worker, request).await.unwrap();
        assert_eq!(proxy_request.url.as_str(), "https://app.test/lib.js?v=3");
    }

    #[tokio::test]
    async fn test_to_proxy_request_rejects_foreign_hosts() {
        let (state, _) = test_state();
        let request = Request::builder()
            .uri("https://cdn.other.test/lib.js")
            .body(Body::empty())
            .unwrap();

        let result = to_proxy_request(&state.worker, request).await;
        assert!(matches!(result, Err(ProxyError::InvalidRequest(_))));
    }

    #[test]
    fn test_into_http_response_tags_source() {
        let response = into_http_response(ProxyResponse::gone());

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.headers()[SOURCE_HEADER], "synthetic");
        assert_eq!(response.headers()["x-offline-proxy"], "gone");
    }
}
