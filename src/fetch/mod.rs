//! Outbound HTTP fetching with uniform policy.
//!
//! This module layers cross-cutting concerns over a generic HTTP
//! transport:
//!
//! - [`RequestDecorator`] - identity headers and cache-preference defaults
//!   applied to every outbound request
//! - [`TimeoutSupervisor`] - deadline-based abort for in-flight requests
//! - redirect following - a chain of physical requests observed by the
//!   caller as one logical fetch with a single terminal completion
//! - [`Fetcher`] - the assembled façade issuing decorated, supervised,
//!   redirect-transparent requests through the shared disk cache
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
//! let url = Url::parse("https://example.com/feed.xml").expect("static url");
//! let outcome = fetcher.fetch(OutboundRequest::get(url)).finish().await;
//! if let Some(outcome) = outcome {
//!     println!("{} bytes, status {:?}", outcome.body.len(), outcome.summary.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod decorator;
mod error;
mod fetcher;
mod redirect;
mod request;
mod timeout;
mod transport;

pub use decorator::RequestDecorator;
pub use error::FetchError;
pub use fetcher::{FetchHandle, FetchOutcome, Fetcher};
pub use request::{CacheMode, OutboundRequest};
pub use timeout::TimeoutSupervisor;
pub use transport::{
    AbortHandle, HttpTransport, InFlightReply, ReplyEvent, ReplyId, ReplySummary, Transport,
};
