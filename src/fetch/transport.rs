//! Transport boundary: dispatching physical requests and observing them.
//!
//! [`Transport::dispatch`] hands back an [`InFlightReply`]: a handle whose
//! event stream carries body data, progress, errors, and exactly one
//! terminal [`ReplyEvent::Finished`]. [`HttpTransport`] is the production
//! implementation, driving reqwest with automatic redirects disabled (the
//! [`RedirectFollower`](super::redirect::RedirectFollower) owns redirect
//! policy) and the shared [`DiskCache`] installed in-path: cache-preferring
//! requests are served from disk without network dispatch, and cacheable
//! responses are written through as they stream.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CACHE_CONTROL, HeaderMap, LOCATION};
use reqwest::{Client, Method, StatusCode};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, warn};
use url::Url;

use super::constants::CONNECT_TIMEOUT_SECS;
use super::error::FetchError;
use super::request::{CacheMode, OutboundRequest};
use crate::cache::{CacheMetadata, DiskCache};

/// Stable identity of one physical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyId(u64);

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reply-{}", self.0)
    }
}

fn next_reply_id() -> ReplyId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    ReplyId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Cancels an in-flight physical request.
///
/// Cloneable; the first call to [`abort`](AbortHandle::abort) wins and the
/// rest are no-ops. Aborting surfaces on the reply's event stream as
/// [`FetchError::Aborted`] followed by a failed terminal completion, the
/// same path a deadline abort takes.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortHandle {
    fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Requests cancellation of the associated physical request.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested.
    pub(crate) async fn cancelled(&self) {
        if self.is_aborted() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Terminal description of a completed physical request.
#[derive(Debug, Clone)]
pub struct ReplySummary {
    /// URL the physical request targeted.
    pub url: Url,
    /// Response status; `None` when the request failed before a response.
    pub status: Option<StatusCode>,
    /// Response headers (empty on failure).
    pub headers: HeaderMap,
    /// Resolved redirect target, when the response is a redirect with a
    /// usable `Location`.
    pub redirect_target: Option<Url>,
    /// Whether the body was served from the disk cache.
    pub from_cache: bool,
    /// Whether the request failed (error event precedes this summary).
    pub failed: bool,
}

impl ReplySummary {
    /// Whether the response still points somewhere else. After redirect
    /// following, this is only set when the hop budget ran out.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.redirect_target.is_some()
    }

    pub(crate) fn failure(url: Url) -> Self {
        Self {
            url,
            status: None,
            headers: HeaderMap::new(),
            redirect_target: None,
            from_cache: false,
            failed: true,
        }
    }
}

/// Events emitted on a reply's stream.
///
/// Every reply ends with exactly one [`Finished`](ReplyEvent::Finished);
/// failures emit an [`Error`](ReplyEvent::Error) first.
#[derive(Debug)]
pub enum ReplyEvent {
    /// A chunk of response body.
    Data(Vec<u8>),
    /// Cumulative download progress.
    DownloadProgress {
        /// Bytes received so far.
        received: u64,
        /// Expected total, when the response advertised one.
        total: Option<u64>,
    },
    /// Request body upload progress.
    UploadProgress {
        /// Bytes sent.
        sent: u64,
        /// Total body size.
        total: u64,
    },
    /// Transport-level failure (network, abort, cache miss).
    Error(FetchError),
    /// Terminal completion.
    Finished(ReplySummary),
}

/// A physical request in flight.
///
/// Dropping the reply while it is still executing aborts it; the timeout
/// supervisor observes that as completion and disarms its watcher.
#[derive(Debug)]
pub struct InFlightReply {
    id: ReplyId,
    request: OutboundRequest,
    events: mpsc::UnboundedReceiver<ReplyEvent>,
    abort: AbortHandle,
    done: watch::Receiver<bool>,
}

impl InFlightReply {
    /// This reply's stable identity.
    #[must_use]
    pub fn id(&self) -> ReplyId {
        self.id
    }

    /// The URL this physical request targets.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.request.url
    }

    /// The request as dispatched (post-decoration).
    #[must_use]
    pub fn request(&self) -> &OutboundRequest {
        &self.request
    }

    /// Handle for cancelling this request.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Watch that flips to `true` when the reply reaches its terminal
    /// event (or closes if the driver is torn down).
    pub(crate) fn completion_watch(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    /// Next event on the stream; `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Option<ReplyEvent> {
        self.events.recv().await
    }
}

impl Drop for InFlightReply {
    fn drop(&mut self) {
        // A reply nobody can observe has no reason to keep running.
        if !*self.done.borrow() {
            self.abort.abort();
        }
    }
}

/// Sender-side endpoints paired with an [`InFlightReply`].
pub(crate) struct ReplyParts {
    pub(crate) tx: mpsc::UnboundedSender<ReplyEvent>,
    pub(crate) done: watch::Sender<bool>,
    pub(crate) abort: AbortHandle,
}

/// Creates a reply handle plus the endpoints its driver feeds.
pub(crate) fn new_reply(request: OutboundRequest) -> (InFlightReply, ReplyParts) {
    let (tx, events) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = watch::channel(false);
    let abort = AbortHandle::new();
    let reply = InFlightReply {
        id: next_reply_id(),
        request,
        events,
        abort: abort.clone(),
        done: done_rx,
    };
    (
        reply,
        ReplyParts {
            tx,
            done: done_tx,
            abort,
        },
    )
}

/// The HTTP transport consumed by this core.
///
/// `dispatch` must return immediately; execution happens in the background
/// and is observed through the reply's event stream.
pub trait Transport: Send + Sync {
    /// Dispatches a physical request.
    fn dispatch(&self, request: OutboundRequest) -> InFlightReply;
}

/// Production transport: reqwest with redirects disabled and the shared
/// disk cache installed in-path.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    cache: DiskCache,
}

impl HttpTransport {
    /// Builds the transport around a shared cache handle.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Build` if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(cache: DiskCache) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .map_err(FetchError::build)?;
        Ok(Self { client, cache })
    }
}

impl Transport for HttpTransport {
    fn dispatch(&self, request: OutboundRequest) -> InFlightReply {
        let (reply, parts) = new_reply(request.clone());
        debug!(id = %reply.id(), url = %request.url, method = %request.method, "dispatching request");
        let client = self.client.clone();
        let cache = self.cache.clone();
        tokio::spawn(drive(client, cache, request, parts));
        reply
    }
}

/// Runs one physical exchange, racing it against the abort handle.
async fn drive(client: Client, cache: DiskCache, request: OutboundRequest, parts: ReplyParts) {
    let ReplyParts { tx, done, abort } = parts;
    let url = request.url.clone();

    let exchange = exchange(&client, &cache, &request, &tx);
    tokio::pin!(exchange);
    let aborted = tokio::select! {
        () = abort.cancelled() => true,
        () = &mut exchange => false,
    };

    if aborted {
        debug!(%url, "request aborted");
        forward(&tx, ReplyEvent::Error(FetchError::aborted(url.as_str())));
        forward(&tx, ReplyEvent::Finished(ReplySummary::failure(url)));
    }
    let _ = done.send(true);
}

/// The cache-then-network exchange, emitting events as it goes.
async fn exchange(
    client: &Client,
    cache: &DiskCache,
    request: &OutboundRequest,
    tx: &mpsc::UnboundedSender<ReplyEvent>,
) {
    let url = &request.url;

    if matches!(
        request.cache_mode,
        CacheMode::PreferCache | CacheMode::CacheOnly
    ) {
        match serve_from_cache(cache, url, tx) {
            Ok(true) => return,
            Ok(false) => {}
            Err(error) => {
                warn!(%url, %error, "cache read failed, falling back to network");
            }
        }
        if request.cache_mode == CacheMode::CacheOnly {
            debug!(%url, "cache-only request missed");
            forward(tx, ReplyEvent::Error(FetchError::cache_miss(url.as_str())));
            forward(tx, ReplyEvent::Finished(ReplySummary::failure(url.clone())));
            return;
        }
    }

    let mut builder = client
        .request(request.method.clone(), url.clone())
        .headers(request.headers.clone());
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(error) => {
            forward(tx, ReplyEvent::Error(FetchError::network(url.as_str(), error)));
            forward(tx, ReplyEvent::Finished(ReplySummary::failure(url.clone())));
            return;
        }
    };

    if let Some(body) = &request.body {
        forward(
            tx,
            ReplyEvent::UploadProgress {
                sent: body.len() as u64,
                total: body.len() as u64,
            },
        );
    }

    let status = response.status();
    let headers = response.headers().clone();
    let total = response.content_length();
    let redirect_target = redirect_target(url, status, &headers);

    // Write-through: successful GET responses that allow storage.
    let mut writer = if request.method == Method::GET
        && status == StatusCode::OK
        && !has_no_store(&headers)
    {
        let metadata = CacheMetadata::new(url, status, &headers);
        match cache.begin_insert(metadata) {
            Ok(writer) => Some(writer),
            Err(error) => {
                warn!(%url, %error, "cache insert failed, continuing uncached");
                None
            }
        }
    } else {
        None
    };

    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                received += chunk.len() as u64;
                if let Some(entry) = writer.as_mut() {
                    if let Err(error) = entry.write(&chunk) {
                        warn!(%url, %error, "cache write failed, continuing uncached");
                        writer = None;
                    }
                }
                forward(tx, ReplyEvent::Data(chunk.to_vec()));
                forward(tx, ReplyEvent::DownloadProgress { received, total });
                if tx.is_closed() {
                    debug!(%url, "reply handle dropped, stopping stream");
                    return;
                }
            }
            Err(error) => {
                drop(writer);
                forward(tx, ReplyEvent::Error(FetchError::network(url.as_str(), error)));
                forward(tx, ReplyEvent::Finished(ReplySummary::failure(url.clone())));
                return;
            }
        }
    }

    if let Some(entry) = writer {
        if let Err(error) = cache.insert_complete(entry) {
            warn!(%url, %error, "cache commit failed");
        }
    }

    forward(
        tx,
        ReplyEvent::Finished(ReplySummary {
            url: url.clone(),
            status: Some(status),
            headers,
            redirect_target,
            from_cache: false,
            failed: false,
        }),
    );
}

/// Serves a fresh cache entry onto the event stream; `Ok(false)` on miss.
fn serve_from_cache(
    cache: &DiskCache,
    url: &Url,
    tx: &mpsc::UnboundedSender<ReplyEvent>,
) -> Result<bool, FetchError> {
    let Some(metadata) = cache.metadata(url)? else {
        return Ok(false);
    };
    let Some(body) = cache.fetch(url)? else {
        return Ok(false);
    };

    let received = body.len() as u64;
    debug!(%url, bytes = received, "serving from cache");
    let summary = ReplySummary {
        url: url.clone(),
        status: Some(StatusCode::from_u16(metadata.status).unwrap_or(StatusCode::OK)),
        headers: metadata.header_map(),
        redirect_target: None,
        from_cache: true,
        failed: false,
    };
    forward(tx, ReplyEvent::Data(body));
    forward(
        tx,
        ReplyEvent::DownloadProgress {
            received,
            total: Some(received),
        },
    );
    forward(tx, ReplyEvent::Finished(summary));
    Ok(true)
}

/// Resolves a redirect response's `Location` against the current URL.
///
/// Handles both absolute and relative targets; an unresolvable value is
/// treated as "no redirect" so the response surfaces as-is.
fn redirect_target(url: &Url, status: StatusCode, headers: &HeaderMap) -> Option<Url> {
    if !status.is_redirection() {
        return None;
    }
    let location = headers.get(LOCATION)?.to_str().ok()?;
    match url.join(location) {
        Ok(target) => Some(target),
        Err(error) => {
            debug!(%url, location, %error, "unresolvable redirect target, surfacing response as-is");
            None
        }
    }
}

fn has_no_store(headers: &HeaderMap) -> bool {
    headers
        .get(CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("no-store"))
}

fn forward(tx: &mpsc::UnboundedSender<ReplyEvent>, event: ReplyEvent) {
    let _ = tx.send(event);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn headers_with_location(location: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
        headers
    }

    #[test]
    fn test_redirect_target_absolute() {
        let target = redirect_target(
            &url("https://a.example/start"),
            StatusCode::FOUND,
            &headers_with_location("https://b.example/next"),
        );
        assert_eq!(target, Some(url("https://b.example/next")));
    }

    #[test]
    fn test_redirect_target_relative() {
        let target = redirect_target(
            &url("https://a.example/dir/start"),
            StatusCode::MOVED_PERMANENTLY,
            &headers_with_location("../other"),
        );
        assert_eq!(target, Some(url("https://a.example/other")));
    }

    #[test]
    fn test_redirect_target_requires_redirect_status() {
        let target = redirect_target(
            &url("https://a.example/start"),
            StatusCode::OK,
            &headers_with_location("https://b.example/next"),
        );
        assert!(target.is_none());
    }

    #[test]
    fn test_redirect_without_location_is_final() {
        let target = redirect_target(
            &url("https://a.example/start"),
            StatusCode::FOUND,
            &HeaderMap::new(),
        );
        assert!(target.is_none());
    }

    #[test]
    fn test_no_store_detected_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("No-Store, private"));
        assert!(has_no_store(&headers));
        assert!(!has_no_store(&HeaderMap::new()));
    }

    #[test]
    fn test_abort_handle_is_idempotent() {
        let handle = AbortHandle::new();
        assert!(!handle.is_aborted());
        handle.abort();
        handle.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_cancelled_resolves_after_abort() {
        let handle = AbortHandle::new();
        handle.abort();
        // Must not hang even though abort happened before the wait.
        tokio_test::block_on(handle.cancelled());
    }

    #[tokio::test]
    async fn test_reply_ids_are_unique() {
        let request = OutboundRequest::get(url("https://example.com/a"));
        let (a, _parts_a) = new_reply(request.clone());
        let (b, _parts_b) = new_reply(request);
        assert_ne!(a.id(), b.id());
    }
}
