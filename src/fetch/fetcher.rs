//! The assembled fetch façade: decoration, caching, deadlines, and
//! redirect transparency behind a single `fetch` call.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::instrument;

use super::decorator::RequestDecorator;
use super::error::FetchError;
use super::redirect::{AbortRelay, RedirectFollower};
use super::request::OutboundRequest;
use super::timeout::TimeoutSupervisor;
use super::transport::{HttpTransport, ReplyEvent, ReplySummary, Transport};
use crate::cache::DiskCache;
use crate::config::NetConfig;

/// Issues outbound requests with uniform policy applied.
///
/// Owns the request decorator, the transport (with the shared
/// [`DiskCache`] installed in-path), the timeout supervisor, and the
/// redirect hop budget. One `Fetcher` per request-issuing session; the
/// cache handle may be shared between many.
///
/// # Example
///
/// ```no_run
/// use netfetch::{Fetcher, NetConfig, OutboundRequest, ReplyEvent};
/// use url::Url;
///
/// # async fn example() -> Result<(), netfetch::FetchError> {
/// let config = NetConfig::new("./network-cache", "player", "1.2.3");
/// let fetcher = Fetcher::new(&config)?;
///
/// let url = Url::parse("https://example.com/cover.jpg").expect("static url");
/// let mut handle = fetcher.fetch(OutboundRequest::get(url));
/// while let Some(event) = handle.next_event().await {
///     if let ReplyEvent::Finished(summary) = event {
///         println!("done: {:?}", summary.status);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Fetcher {
    decorator: RequestDecorator,
    transport: Arc<dyn Transport>,
    timeouts: Arc<TimeoutSupervisor>,
    cache: DiskCache,
    max_redirects: u32,
}

impl Fetcher {
    /// Opens the configured cache directory and assembles the fetcher.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Cache` if the cache directory cannot be
    /// opened, or `FetchError::Build` if the HTTP client cannot be
    /// constructed.
    pub fn new(config: &NetConfig) -> Result<Self, FetchError> {
        let cache = DiskCache::open(&config.cache_dir)?;
        Self::with_cache(config, cache)
    }

    /// Assembles a fetcher around an existing shared cache handle.
    ///
    /// Use this when several sessions share one cache: open the cache
    /// once, clone the handle into each fetcher.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Build` if the HTTP client cannot be
    /// constructed.
    pub fn with_cache(config: &NetConfig, cache: DiskCache) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(cache.clone())?;
        Ok(Self::assemble(config, cache, Arc::new(transport)))
    }

    pub(crate) fn assemble(
        config: &NetConfig,
        cache: DiskCache,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            decorator: RequestDecorator::new(&config.app_name, &config.app_version),
            transport,
            timeouts: Arc::new(TimeoutSupervisor::new(config.request_timeout)),
            cache,
            max_redirects: config.max_redirects,
        }
    }

    /// Dispatches a logical fetch.
    ///
    /// The request is decorated, executed through the cache-aware
    /// transport, supervised against the configured deadline, and followed
    /// through redirects up to the hop budget. The returned handle emits
    /// forwarded data/progress/error events and exactly one terminal
    /// [`ReplyEvent::Finished`].
    ///
    /// Must be called within a tokio runtime.
    #[instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    pub fn fetch(&self, request: OutboundRequest) -> FetchHandle {
        let request = self.decorator.decorate(request);
        let reply = self.transport.dispatch(request);

        let (tx, events) = mpsc::unbounded_channel();
        let relay = AbortRelay::new();
        let follower = RedirectFollower::new(
            Arc::clone(&self.transport),
            self.decorator.clone(),
            Arc::clone(&self.timeouts),
            relay.clone(),
            self.max_redirects,
            tx,
        );
        tokio::spawn(follower.run(reply));

        FetchHandle { events, relay }
    }

    /// The shared cache, for direct inspection (size, remove, clear)
    /// without going through a fetch.
    #[must_use]
    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// The deadline supervisor watching this fetcher's requests.
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutSupervisor {
        &self.timeouts
    }
}

/// Observer side of one logical fetch.
///
/// Events from every physical request in the redirect chain arrive here as
/// one stream; the terminal [`ReplyEvent::Finished`] carries the final
/// resolved response (or the last redirect, when the hop budget ran out).
#[derive(Debug)]
pub struct FetchHandle {
    events: mpsc::UnboundedReceiver<ReplyEvent>,
    relay: AbortRelay,
}

impl FetchHandle {
    /// Next event on the logical stream; `None` once exhausted.
    pub async fn next_event(&mut self) -> Option<ReplyEvent> {
        self.events.recv().await
    }

    /// Aborts whichever physical request is currently active (and any the
    /// chain would dispatch afterwards).
    pub fn abort(&self) {
        self.relay.abort();
    }

    /// Drains the stream to completion, collecting the body.
    ///
    /// Returns `None` only if the fetch was torn down without a terminal
    /// event.
    pub async fn finish(mut self) -> Option<FetchOutcome> {
        let mut body = Vec::new();
        let mut error = None;
        while let Some(event) = self.events.recv().await {
            match event {
                ReplyEvent::Data(chunk) => body.extend_from_slice(&chunk),
                ReplyEvent::Error(e) => error = Some(e),
                ReplyEvent::Finished(summary) => {
                    return Some(FetchOutcome {
                        summary,
                        body,
                        error,
                    });
                }
                ReplyEvent::DownloadProgress { .. } | ReplyEvent::UploadProgress { .. } => {}
            }
        }
        None
    }
}

/// Collected result of a completed fetch.
#[derive(Debug)]
pub struct FetchOutcome {
    /// Terminal summary of the final physical response.
    pub summary: ReplySummary,
    /// Concatenated body data.
    pub body: Vec<u8>,
    /// Last transport-level error observed, if the fetch failed.
    pub error: Option<FetchError>,
}
