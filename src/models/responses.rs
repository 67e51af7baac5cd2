//! Response models
//!
//! The response value every strategy produces, and the DTOs returned by the
//! HTTP host adapter's own endpoints.

use bytes::Bytes;
use serde::Serialize;

use crate::cache::StatsSnapshot;

/// Header attached to every synthetic response.
pub const OFFLINE_HEADER: &str = "x-offline-proxy";

// == Response Source ==
/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh from the network
    Network,
    /// A stored entry for the same request key
    Cache,
    /// A stored entry for a different key (the entry document)
    Fallback,
    /// Built locally because nothing else was available
    Synthetic,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Fallback => "fallback",
            ResponseSource::Synthetic => "synthetic",
        }
    }
}

// == Proxy Response ==
/// A response substituted for the default network behavior.
///
/// Responses are immutable once produced; the body is reference counted so
/// a copy can be persisted while the original is returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// Where the response came from
    pub source: ResponseSource,
}

impl ProxyResponse {
    /// Creates a network response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Re-tags the response with a different source.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Success indicator: status in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    // == Synthetic Responses ==
    /// Minimal offline document for navigations with nothing stored.
    pub fn offline_document() -> Self {
        Self::new(
            503,
            "<!doctype html><title>Offline</title><p>You are offline.</p>",
        )
        .with_header("content-type", "text/html; charset=utf-8")
        .with_header(OFFLINE_HEADER, "offline")
        .with_source(ResponseSource::Synthetic)
    }

    /// "Unavailable" marker for near-real-time data with nothing stored.
    pub fn unavailable_data() -> Self {
        Self::new(503, r#"{"error":"unavailable","offline":true}"#)
            .with_header("content-type", "application/json")
            .with_header(OFFLINE_HEADER, "unavailable")
            .with_source(ResponseSource::Synthetic)
    }

    /// Empty "gone" response for assets with nothing stored.
    pub fn gone() -> Self {
        Self::new(504, Bytes::new())
            .with_header(OFFLINE_HEADER, "gone")
            .with_source(ResponseSource::Synthetic)
    }
}

// == Host Adapter DTOs ==
/// Response body for the stats endpoint (GET /__proxy/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Build version of the running engine
    pub build_version: String,
    /// Lifecycle state of the running engine
    pub state: String,
    /// Engine counters
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    /// cache_hits / (cache_hits + cache_misses)
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from a counter snapshot
    pub fn new(
        build_version: impl Into<String>,
        state: impl Into<String>,
        counters: StatsSnapshot,
    ) -> Self {
        Self {
            build_version: build_version.into(),
            state: state.into(),
            hit_rate: counters.hit_rate(),
            counters,
        }
    }
}

/// Response body for the health endpoint (GET /__proxy/health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Lifecycle state of the running engine
    pub state: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn new(state: impl Into<String>) -> Self {
        let state = state.into();
        let status = match state.as_str() {
            "active" => "healthy",
            "redundant" => "degraded",
            _ => "starting",
        };
        Self {
            status: status.to_string(),
            state,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for the control endpoint (POST /__proxy/control)
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    /// Whether the message triggered an activation request
    pub accepted: bool,
    /// Lifecycle state after handling the message
    pub state: String,
}

impl ControlResponse {
    pub fn new(accepted: bool, state: impl Into<String>) -> Self {
        Self {
            accepted,
            state: state.into(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
