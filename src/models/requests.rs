//! Request models
//!
//! The inbound request descriptor delivered by the host for each fetch event,
//! and the control messages sent by open application sessions.

use bytes::Bytes;
use serde::Deserialize;
use url::Url;

use crate::error::{ProxyError, Result};

/// An inbound request descriptor.
///
/// Carries the method, URL, declared accept type and the navigation and
/// destination hints the host attaches to every outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Absolute request URL
    pub url: Url,
    /// Value of the `Accept` header, if any
    pub accept: Option<String>,
    /// Set when the host reports a top-level navigation
    pub navigate: bool,
    /// Destination hint (`image`, `script`, `style`, `font`, ...)
    pub destination: Option<String>,
    /// Remaining headers, forwarded verbatim on the network leg
    pub headers: Vec<(String, String)>,
    /// Request body; empty for GET
    pub body: Bytes,
}

impl ProxyRequest {
    /// Creates a GET request for an absolute URL.
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| ProxyError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;
        Ok(Self::from_url("GET", url))
    }

    /// Creates a request with the given method for an already parsed URL.
    pub fn from_url(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            accept: None,
            navigate: false,
            destination: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Marks the request as a top-level navigation.
    pub fn navigation(mut self) -> Self {
        self.navigate = true;
        self
    }

    /// Sets the declared accept type.
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Sets the destination hint.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Adds a header forwarded on the network leg.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns true for GET requests.
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Key under which the response to this request is stored.
    ///
    /// The fragment never reaches the network, so it is not part of the key.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// Control messages accepted from open application sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Skip the wait for open sessions and activate the waiting build now
    #[serde(rename = "FORCE_ACTIVATE", alias = "SKIP_WAITING")]
    ForceActivate,
}

impl ControlMessage {
    /// Parses a bare message string as sent by `postMessage`-style channels.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "FORCE_ACTIVATE" | "SKIP_WAITING" => Ok(Self::ForceActivate),
            other => Err(ProxyError::InvalidRequest(format!(
                "unknown control message '{}'",
                other
            ))),
        }
    }
}
