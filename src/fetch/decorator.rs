//! Uniform request policy applied before every dispatch.

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue, USER_AGENT};

use super::constants::FORM_CONTENT_TYPE;
use super::request::{CacheMode, OutboundRequest};

/// Rewrites outbound requests with cross-cutting policy.
///
/// Three rules, applied to every request (including each redirect hop):
/// the User-Agent is always overwritten with the application identity,
/// POST requests without a Content-Type default to form-urlencoded, and
/// the transport's default cache sentinel
/// ([`CacheMode::PreferNetwork`]) is inverted to
/// [`CacheMode::PreferCache`]. Any other cache choice the caller made is
/// preserved.
///
/// Pure transformation with no side effects; decorating twice equals
/// decorating once.
#[derive(Debug, Clone)]
pub struct RequestDecorator {
    user_agent: HeaderValue,
}

impl RequestDecorator {
    /// Creates a decorator identifying the application as
    /// "`<name> <version>`".
    #[must_use]
    pub fn new(app_name: &str, app_version: &str) -> Self {
        let identity = format!("{app_name} {app_version}");
        // Header values cannot carry control characters; an application
        // identity that does is replaced with the crate name.
        let user_agent = HeaderValue::from_str(&identity)
            .unwrap_or_else(|_| HeaderValue::from_static(env!("CARGO_PKG_NAME")));
        Self { user_agent }
    }

    /// Applies the policy, producing the rewritten request.
    #[must_use]
    pub fn decorate(&self, mut request: OutboundRequest) -> OutboundRequest {
        request
            .headers
            .insert(USER_AGENT, self.user_agent.clone());

        if request.method == Method::POST && !request.headers.contains_key(CONTENT_TYPE) {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }

        if request.cache_mode == CacheMode::PreferNetwork {
            request.cache_mode = CacheMode::PreferCache;
        }

        request
    }
}
