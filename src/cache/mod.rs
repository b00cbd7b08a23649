//! Disk-backed response cache shared between request-issuing threads.
//!
//! This module provides the [`DiskCache`] handle: a cloneable facade over a
//! single shared store where every operation is serialized under one lock.
//! The transport layer installs it as the in-path cache for outbound
//! requests; application code can also query, remove, or clear entries
//! directly.
//!
//! # Example
//!
//! ```no_run
//! use netfetch::cache::DiskCache;
//! use url::Url;
//!
//! # fn example() -> Result<(), netfetch::cache::CacheError> {
//! let cache = DiskCache::open("./network-cache")?;
//! let url = Url::parse("https://example.com/cover.jpg").expect("static url");
//! if let Some(body) = cache.fetch(&url)? {
//!     println!("{} cached bytes", body.len());
//! }
//! println!("cache holds {} bytes", cache.size());
//! # Ok(())
//! # }
//! ```

mod error;
mod metadata;
mod store;

pub use error::CacheError;
pub use metadata::CacheMetadata;
pub use store::{DiskCache, EntryWriter};
