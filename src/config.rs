//! Construction-time configuration for the HTTP client core.

use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::constants::{DEFAULT_MAX_REDIRECTS, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Configuration for a [`Fetcher`](crate::fetch::Fetcher) and its shared
/// cache.
///
/// The cache directory is resolved by the embedding application (for
/// example from its platform config-path provider); this crate only
/// consumes the resolved path.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Directory backing the shared disk cache.
    pub cache_dir: PathBuf,
    /// Wall-clock deadline applied to every physical request.
    pub request_timeout: Duration,
    /// Maximum number of redirect hops followed per logical fetch.
    pub max_redirects: u32,
    /// Application name used in the User-Agent header.
    pub app_name: String,
    /// Application version used in the User-Agent header.
    pub app_version: String,
}

impl NetConfig {
    /// Creates a configuration with default timeout and redirect limits.
    #[must_use]
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }

    /// Overrides the per-request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the redirect hop budget.
    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// The User-Agent value derived from the application identity.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("{} {}", self.app_name, self.app_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = NetConfig::new("/tmp/cache", "player", "1.2.3");
        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(config.user_agent(), "player 1.2.3");
    }

    #[test]
    fn test_builder_overrides() {
        let config = NetConfig::new("/tmp/cache", "player", "1.2.3")
            .with_request_timeout(Duration::from_millis(250))
            .with_max_redirects(1);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.max_redirects, 1);
    }
}
