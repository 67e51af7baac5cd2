//! Request and Response models
//!
//! Descriptors exchanged with the host runtime for every intercepted request,
//! plus the DTOs serialized by the HTTP host adapter.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ControlMessage, ProxyRequest};
pub use responses::{
    ControlResponse, ErrorResponse, HealthResponse, ProxyResponse, ResponseSource, StatsResponse,
};
