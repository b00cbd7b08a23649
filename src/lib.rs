//! netfetch - HTTP client core for a desktop application
//!
//! This library sits between application code ("fetch this URL") and a
//! generic HTTP transport, adding cross-cutting policy: identification
//! headers, cache-preference defaults, stall protection, and redirect
//! transparency.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`cache`] - shared, mutex-serialized disk cache of responses
//! - [`config`] - construction-time configuration
//! - [`fetch`] - request decoration, deadline supervision, redirect
//!   following, and the assembled [`Fetcher`] façade
//!
//! # Example
//!
//! ```no_run
//! use netfetch::{Fetcher, NetConfig, OutboundRequest};
//! use url::Url;
//!
//! # async fn example() -> Result<(), netfetch::FetchError> {
//! let config = NetConfig::new("./network-cache", "player", "1.2.3");
//! let fetcher = Fetcher::new(&config)?;
//!
//! let url = Url::parse("https://example.com/cover.jpg").expect("static url");
//! let outcome = fetcher.fetch(OutboundRequest::get(url)).finish().await;
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod fetch;

// Re-export commonly used types
pub use cache::{CacheError, CacheMetadata, DiskCache, EntryWriter};
pub use config::NetConfig;
pub use fetch::{
    CacheMode, FetchError, FetchHandle, FetchOutcome, Fetcher, OutboundRequest, ReplyEvent,
    ReplySummary, RequestDecorator, TimeoutSupervisor,
};
