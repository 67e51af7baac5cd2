//! HTTP fetcher that forwards network legs to an upstream origin.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::models::{ProxyRequest, ProxyResponse, ResponseSource};
use crate::network::{FetchMode, Fetcher};

/// Headers that describe one hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "host",
    "content-length",
];

/// Forwards requests for the application origin to an upstream server.
/// Requests for any other origin go to that origin directly.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    origin: Url,
    upstream: Url,
}

impl HttpFetcher {
    /// Creates a fetcher for the given upstream with a hard request timeout.
    pub fn new(origin: Url, upstream: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("offline-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ProxyError::NetworkUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            origin,
            upstream,
        })
    }

    /// Maps an application URL onto the upstream, keeping path and query.
    /// Other hosts (only denylisted ones get this far) are reached directly.
    fn upstream_url(&self, url: &Url) -> Url {
        if url.origin() != self.origin.origin() {
            let mut target = url.clone();
            target.set_fragment(None);
            return target;
        }
        let mut target = self.upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        target
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ProxyRequest, mode: FetchMode) -> Result<ProxyResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProxyError::InvalidRequest(format!("invalid method: {}", e)))?;
        let target = self.upstream_url(&request.url);

        let mut builder = self.http.request(method, target.clone());
        for (name, value) in &request.headers {
            if !HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(accept) = &request.accept {
            builder = builder.header(header::ACCEPT, accept.as_str());
        }
        builder = match mode {
            FetchMode::Default => builder,
            FetchMode::NoStore => builder.header(header::CACHE_CONTROL, "no-store"),
            FetchMode::Reload => builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache"),
        };
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::NetworkUnavailable(format!("{}: {}", target, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| {
            ProxyError::NetworkUnavailable(format!("failed to read response: {}", e))
        })?;

        tracing::debug!(%target, status, bytes = body.len(), "Upstream responded");

        Ok(ProxyResponse {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}
