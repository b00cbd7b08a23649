//! Constants for the fetch module (timeouts, redirect limits).

/// Default per-request deadline (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default maximum redirect hops followed per logical fetch.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// TCP connect timeout applied to the underlying HTTP client (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Content type defaulted onto POST requests that carry none.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
