//! Cache entry metadata: response headers, status, and validity window.

use std::time::{Duration, SystemTime};

use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, EXPIRES, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Metadata stored alongside each cached response body.
///
/// Persisted as a JSON sidecar file next to the body file. The validity
/// window (`expires`) is derived from the response's `Cache-Control: max-age`
/// directive, falling back to the `Expires` header; entries without either
/// are treated as valid until overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// The request URL this entry was stored under.
    pub url: String,
    /// HTTP status code of the cached response.
    pub status: u16,
    /// Response headers as name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Instant after which the entry is no longer served.
    pub expires: Option<SystemTime>,
    /// When the entry was stored.
    pub created: SystemTime,
}

impl CacheMetadata {
    /// Builds metadata for a response, deriving the validity window from
    /// standard HTTP caching headers.
    #[must_use]
    pub fn new(url: &Url, status: StatusCode, headers: &HeaderMap) -> Self {
        let pairs = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            url: url.to_string(),
            status: status.as_u16(),
            headers: pairs,
            expires: derive_expiry(headers, SystemTime::now()),
            created: SystemTime::now(),
        }
    }

    /// Whether the entry is still within its validity window at `now`.
    ///
    /// Entries without expiry information are considered fresh; eviction
    /// policy is out of scope for this layer.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires {
            Some(expires) => now < expires,
            None => true,
        }
    }

    /// Reconstructs a [`HeaderMap`] from the stored pairs.
    ///
    /// Pairs that no longer parse as valid header names/values are skipped.
    #[must_use]
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Looks up a stored header value by (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Derives the expiry instant from `Cache-Control: max-age` or `Expires`.
fn derive_expiry(headers: &HeaderMap, now: SystemTime) -> Option<SystemTime> {
    if let Some(max_age) = parse_max_age(headers) {
        return Some(now + max_age);
    }

    let expires = headers.get(EXPIRES)?.to_str().ok()?;
    match httpdate::parse_http_date(expires) {
        Ok(instant) => Some(instant),
        Err(error) => {
            debug!(value = %expires, %error, "unparseable Expires header, entry has no expiry");
            None
        }
    }
}

/// Extracts `max-age` seconds from the `Cache-Control` header, if present.
fn parse_max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;
    value.split(',').find_map(|directive| {
        let directive = directive.trim();
        let seconds = directive.strip_prefix("max-age=")?;
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    })
}
