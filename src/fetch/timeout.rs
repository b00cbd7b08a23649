//! Deadline supervision for in-flight requests.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{InFlightReply, ReplyId};

/// Bounds the wall-clock duration of tracked replies.
///
/// Each tracked reply gets exactly one watcher task that races the reply's
/// completion against the configured deadline. If the deadline elapses
/// first, the reply is aborted (a transport-level cancellation, so the
/// failure reaches its owner through the normal event stream); if the
/// reply completes or is destroyed first, the watcher disarms without
/// firing. Either way the association is removed, so a reply never has a
/// dangling timer.
#[derive(Debug)]
pub struct TimeoutSupervisor {
    timeout: Duration,
    watchers: Arc<DashMap<ReplyId, JoinHandle<()>>>,
}

impl TimeoutSupervisor {
    /// Creates a supervisor with a fixed per-request deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            watchers: Arc::new(DashMap::new()),
        }
    }

    /// The configured deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arms deadline supervision for `reply`.
    ///
    /// Idempotent: a reply that is already tracked is left untouched, so a
    /// reply has at most one active watcher at any instant. Re-tracking
    /// after the watcher disarmed starts a fresh deadline.
    pub fn track(&self, reply: &InFlightReply) {
        let id = reply.id();
        match self.watchers.entry(id) {
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                let abort = reply.abort_handle();
                let done = reply.completion_watch();
                let timeout = self.timeout;
                let watchers = Arc::clone(&self.watchers);
                let url = reply.url().clone();
                slot.insert(tokio::spawn(async move {
                    let completion = done.clone();
                    tokio::select! {
                        () = wait_completed(completion) => {
                            debug!(%id, "reply finished within deadline");
                        }
                        () = tokio::time::sleep(timeout) => {
                            warn!(%id, %url, timeout_ms = timeout.as_millis() as u64, "deadline elapsed, aborting request");
                            abort.abort();
                            // The abort surfaces as the reply's completion.
                            wait_completed(done).await;
                        }
                    }
                    watchers.remove(&id);
                }));
            }
        }
    }

    /// Disarms supervision for `id`, if tracked. Idempotent.
    pub fn untrack(&self, id: ReplyId) {
        if let Some((_, watcher)) = self.watchers.remove(&id) {
            watcher.abort();
            debug!(%id, "reply untracked");
        }
    }

    /// Whether `id` currently has an armed watcher.
    #[must_use]
    pub fn is_tracked(&self, id: ReplyId) -> bool {
        self.watchers.contains_key(&id)
    }

    /// Number of replies currently under supervision.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.watchers.len()
    }
}

/// Resolves when the completion watch flips to `true` or closes
/// (reply destroyed before finishing).
async fn wait_completed(mut done: watch::Receiver<bool>) {
    loop {
        if *done.borrow_and_update() {
            return;
        }
        if done.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::request::OutboundRequest;
    use crate::fetch::transport::{ReplyEvent, ReplyParts, ReplySummary, new_reply};
    use url::Url;

    fn pending_reply() -> (InFlightReply, ReplyParts) {
        let url = Url::parse("https://example.com/slow").unwrap();
        new_reply(OutboundRequest::get(url))
    }

    /// Emits the terminal event and flips the completion watch, as a
    /// transport driver would.
    fn finish(parts: &ReplyParts, url: &Url) {
        let _ = parts
            .tx
            .send(ReplyEvent::Finished(ReplySummary::failure(url.clone())));
        let _ = parts.done.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_unfinished_reply() {
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(100));
        let (reply, parts) = pending_reply();

        supervisor.track(&reply);
        assert!(supervisor.is_tracked(reply.id()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(
            parts.abort.is_aborted(),
            "deadline must abort the tracked reply"
        );

        // The abort reaches the driver, which finishes the reply; the
        // watcher then unregisters itself.
        finish(&parts, reply.url());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!supervisor.is_tracked(reply.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_before_deadline_never_aborts() {
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(100));
        let (reply, parts) = pending_reply();

        supervisor.track(&reply);
        tokio::time::sleep(Duration::from_millis(50)).await;
        finish(&parts, reply.url());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(
            !parts.abort.is_aborted(),
            "completed reply must not be aborted by a stale deadline"
        );
        assert!(!supervisor.is_tracked(reply.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_is_idempotent() {
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(100));
        let (reply, parts) = pending_reply();

        supervisor.track(&reply);
        supervisor.track(&reply);
        supervisor.track(&reply);
        assert_eq!(supervisor.tracked(), 1);

        finish(&parts, reply.url());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(supervisor.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrack_is_idempotent_and_cancels_deadline() {
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(100));
        let (reply, parts) = pending_reply();

        supervisor.track(&reply);
        supervisor.untrack(reply.id());
        supervisor.untrack(reply.id());
        assert!(!supervisor.is_tracked(reply.id()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(
            !parts.abort.is_aborted(),
            "untracked reply must never be aborted"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_destruction_disarms_watcher() {
        let supervisor = TimeoutSupervisor::new(Duration::from_secs(60));
        let (reply, parts) = pending_reply();
        let id = reply.id();

        supervisor.track(&reply);
        // Destroying the reply aborts it; the driver would then finish.
        drop(reply);
        assert!(parts.abort.is_aborted());
        let _ = parts.done.send(true);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!supervisor.is_tracked(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retracking_after_completion_arms_fresh_deadline() {
        let supervisor = TimeoutSupervisor::new(Duration::from_millis(100));
        let (reply, parts) = pending_reply();

        supervisor.track(&reply);
        finish(&parts, reply.url());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!supervisor.is_tracked(reply.id()));

        // Same identity reused: a fresh watcher is armed.
        let (second, second_parts) = pending_reply();
        supervisor.track(&second);
        assert!(supervisor.is_tracked(second.id()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(second_parts.abort.is_aborted());
    }
}
