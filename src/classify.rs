//! Request Classifier
//!
//! Maps an inbound request to exactly one category and decides whether the
//! engine intercepts it at all. Pure and total: no side effects, and every
//! request lands in one category.

use std::fmt;

use serde::Serialize;
use url::Url;

use crate::config::EngineConfig;
use crate::models::ProxyRequest;

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "bmp",
];
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot",
];
const STATIC_DESTINATIONS: &[&str] = &["script", "style", "font", "worker"];

// == Request Category ==
/// Category assigned to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestCategory {
    #[serde(rename = "navigation/html")]
    Navigation,
    #[serde(rename = "bypass-origin")]
    Bypass,
    #[serde(rename = "realtime-data")]
    RealtimeData,
    #[serde(rename = "image-asset")]
    Image,
    #[serde(rename = "static-asset")]
    StaticAsset,
    #[serde(rename = "other")]
    Other,
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestCategory::Navigation => "navigation/html",
            RequestCategory::Bypass => "bypass-origin",
            RequestCategory::RealtimeData => "realtime-data",
            RequestCategory::Image => "image-asset",
            RequestCategory::StaticAsset => "static-asset",
            RequestCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// Why a request is passed straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Not a GET request
    Method,
    /// Host is on the live-data denylist
    Denylisted,
    /// Different origin than the application
    CrossOrigin,
}

/// Result of classifying one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: RequestCategory,
    pub intercept: bool,
    pub bypass: Option<BypassReason>,
}

impl Classification {
    fn bypass(reason: BypassReason) -> Self {
        Self {
            category: RequestCategory::Bypass,
            intercept: false,
            bypass: Some(reason),
        }
    }

    fn intercepted(category: RequestCategory) -> Self {
        Self {
            category,
            intercept: true,
            bypass: None,
        }
    }
}

// == Classifier ==
/// Classifies requests against the application origin and the configured
/// denylist and data directory.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Url,
    bypass_hosts: Vec<String>,
    realtime_dir: String,
    realtime_extension: String,
}

impl RequestClassifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            origin: config.origin.clone(),
            bypass_hosts: config
                .bypass_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            realtime_dir: config.realtime_dir.clone(),
            realtime_extension: config.realtime_extension.to_ascii_lowercase(),
        }
    }

    /// Assigns a category, applying the rules in priority order.
    pub fn classify(&self, request: &ProxyRequest) -> Classification {
        if !request.is_get() {
            return Classification::bypass(BypassReason::Method);
        }

        // The denylist wins even over a same-origin match.
        if self.is_denylisted(&request.url) {
            return Classification::bypass(BypassReason::Denylisted);
        }

        if request.url.origin() != self.origin.origin() {
            return Classification::bypass(BypassReason::CrossOrigin);
        }

        let path = request.url.path();
        let extension = extension(path);

        if is_navigation(request, path) {
            return Classification::intercepted(RequestCategory::Navigation);
        }

        if path.contains(&self.realtime_dir)
            && path.to_ascii_lowercase().ends_with(&self.realtime_extension)
        {
            return Classification::intercepted(RequestCategory::RealtimeData);
        }

        if request.destination.as_deref() == Some("image")
            || extension.as_deref().is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
        {
            return Classification::intercepted(RequestCategory::Image);
        }

        if request
            .destination
            .as_deref()
            .is_some_and(|d| STATIC_DESTINATIONS.contains(&d))
            || extension.as_deref().is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext))
        {
            return Classification::intercepted(RequestCategory::StaticAsset);
        }

        Classification::intercepted(RequestCategory::Other)
    }

    /// True for URLs on the application origin or on a denylisted host.
    /// Nothing else is ever forwarded.
    pub fn is_known_target(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin() || self.is_denylisted(url)
    }

    fn is_denylisted(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                self.bypass_hosts.iter().any(|h| *h == host)
            }
            None => false,
        }
    }
}

fn is_navigation(request: &ProxyRequest, path: &str) -> bool {
    request.navigate
        || request
            .accept
            .as_deref()
            .is_some_and(|accept| accept.contains("text/html"))
        || path.ends_with('/')
        || path.to_ascii_lowercase().ends_with(".html")
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
