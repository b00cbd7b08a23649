//! Outbound request model and the per-request cache-control attribute.

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

/// Per-request cache preference.
///
/// [`PreferNetwork`](CacheMode::PreferNetwork) is the transport's default
/// sentinel; the decorator inverts it to
/// [`PreferCache`](CacheMode::PreferCache), so callers that actually want
/// network-first behavior must ask for
/// [`AlwaysNetwork`](CacheMode::AlwaysNetwork) explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Skip cache reads entirely; responses are still written through.
    AlwaysNetwork,
    /// Load from the network (the transport's default sentinel).
    #[default]
    PreferNetwork,
    /// Serve a fresh cache hit without touching the network; otherwise go
    /// to the network and store the result.
    PreferCache,
    /// Serve only from the cache; a miss fails the request.
    CacheOnly,
}

/// An outbound HTTP request before dispatch.
///
/// Built by application code, rewritten once by the
/// [`RequestDecorator`](super::RequestDecorator), then immutable for the
/// rest of its life. Redirect hops clone the request with only the URL
/// replaced.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Cache preference for this request.
    pub cache_mode: CacheMode,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    /// Creates a GET request for `url`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            cache_mode: CacheMode::default(),
            body: None,
        }
    }

    /// Creates a POST request for `url` carrying `body`.
    #[must_use]
    pub fn post(url: Url, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            cache_mode: CacheMode::default(),
            body: Some(body),
        }
    }

    /// Sets the cache preference.
    #[must_use]
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Adds a header, replacing any existing value for the name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}
