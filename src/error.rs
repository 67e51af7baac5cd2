//! Error types for the interception proxy
//!
//! Provides unified error handling using thiserror.
//!
//! Network and timeout failures are recovered locally by every strategy and
//! never reach the application; the remaining variants surface through the
//! lifecycle calls and the control API only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Proxy Error Enum ==
/// Unified error type for the interception proxy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// Connection-level failure while reaching the network
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The network deadline elapsed before a response arrived
    #[error("Network request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// One or more core assets could not be precached
    #[error("Install incomplete: {failed} of {total} core assets failed")]
    InstallIncomplete { failed: usize, total: usize },

    /// The host store API failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A lifecycle operation was invoked in the wrong state
    #[error("Invalid lifecycle state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Malformed request or control message
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    /// Returns true for failures every strategy treats as "network unavailable".
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ProxyError::NetworkUnavailable(_) | ProxyError::Timeout { .. }
        )
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::NetworkUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InstallIncomplete { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidState { .. } => StatusCode::CONFLICT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the interception proxy.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(ProxyError::NetworkUnavailable("refused".into()).is_network());
        assert!(ProxyError::Timeout { after_ms: 3000 }.is_network());
        assert!(!ProxyError::StoreUnavailable("quota".into()).is_network());
        assert!(!ProxyError::InstallIncomplete { failed: 1, total: 3 }.is_network());
    }

    #[test]
    fn test_timeout_is_distinct_from_network_failure() {
        let timeout = ProxyError::Timeout { after_ms: 3000 };
        assert_ne!(timeout, ProxyError::NetworkUnavailable("timeout".into()));
        assert_eq!(timeout.to_string(), "Network request timed out after 3000ms");
    }

    #[test]
    fn test_status_mapping() {
        let response = ProxyError::InvalidRequest("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ProxyError::InvalidState {
            expected: "installed".into(),
            actual: "active".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
