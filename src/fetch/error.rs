//! Error types for the fetch module.

use thiserror::Error;

use crate::cache::CacheError;

/// Errors that can occur while executing a fetch.
///
/// A timeout abort and a caller-initiated abort both surface as
/// [`FetchError::Aborted`], so callers have one failure path to handle
/// regardless of cause. HTTP error statuses (4xx/5xx) are NOT errors at
/// this layer; they arrive in the terminal reply summary for the caller to
/// inspect.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Build {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, broken
    /// stream).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request was aborted before completion (deadline elapsed or the
    /// caller cancelled it).
    #[error("request aborted fetching {url}")]
    Aborted {
        /// The URL that was aborted.
        url: String,
    },

    /// A cache-only request found no usable entry.
    #[error("no cache entry for {url}")]
    CacheMiss {
        /// The URL that missed.
        url: String,
    },

    /// Cache storage failure.
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl FetchError {
    /// Creates a client construction error.
    pub fn build(source: reqwest::Error) -> Self {
        Self::Build { source }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an abort error.
    pub fn aborted(url: impl Into<String>) -> Self {
        Self::Aborted { url: url.into() }
    }

    /// Creates a cache-miss error.
    pub fn cache_miss(url: impl Into<String>) -> Self {
        Self::CacheMiss { url: url.into() }
    }
}
