//! Redirect following: many physical requests observed as one fetch.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::decorator::RequestDecorator;
use super::timeout::TimeoutSupervisor;
use super::transport::{AbortHandle, InFlightReply, ReplyEvent, ReplySummary, Transport};

/// Routes a logical abort to whichever physical request is currently
/// active. If the abort arrives between hops, the next request is
/// cancelled the moment it is registered.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortRelay {
    inner: Arc<Mutex<RelayState>>,
}

#[derive(Debug, Default)]
struct RelayState {
    aborted: bool,
    current: Option<AbortHandle>,
}

impl AbortRelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers the active physical request's abort handle.
    pub(crate) fn set_current(&self, handle: AbortHandle) {
        let mut state = self.lock();
        if state.aborted {
            handle.abort();
        } else {
            state.current = Some(handle);
        }
    }

    /// Aborts the active physical request and any dispatched later.
    pub(crate) fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        if let Some(handle) = state.current.take() {
            handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives a chain of redirects as a single logical fetch.
///
/// Two states: *following* (a physical request is in flight; the loop in
/// [`run`](Self::run) is live) and *resolved* (terminal; `run` has emitted
/// its single final [`ReplyEvent::Finished`] and returned). Data, progress,
/// and error events from whichever physical request is current are
/// forwarded unmodified; only the terminal completion is intercepted and
/// interpreted.
///
/// The hop budget is checked before it is decremented: `max_redirects = N`
/// follows exactly N hops, and if the response after the Nth hop is itself
/// a redirect it is surfaced to the caller as-is (its `redirect_target`
/// stays set, so callers can distinguish "final answer" from "gave up").
pub(crate) struct RedirectFollower {
    transport: Arc<dyn Transport>,
    decorator: RequestDecorator,
    timeouts: Arc<TimeoutSupervisor>,
    relay: AbortRelay,
    hops_remaining: u32,
    events: mpsc::UnboundedSender<ReplyEvent>,
}

impl RedirectFollower {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        decorator: RequestDecorator,
        timeouts: Arc<TimeoutSupervisor>,
        relay: AbortRelay,
        max_redirects: u32,
        events: mpsc::UnboundedSender<ReplyEvent>,
    ) -> Self {
        Self {
            transport,
            decorator,
            timeouts,
            relay,
            hops_remaining: max_redirects,
            events,
        }
    }

    /// Consumes physical replies until the chain resolves, starting from
    /// the already-dispatched `current`.
    pub(crate) async fn run(mut self, mut current: InFlightReply) {
        loop {
            self.relay.set_current(current.abort_handle());
            self.timeouts.track(&current);

            let summary = loop {
                match current.next_event().await {
                    Some(ReplyEvent::Finished(summary)) => break Some(summary),
                    Some(event) => {
                        if self.events.send(event).is_err() {
                            debug!(url = %current.url(), "fetch handle dropped, abandoning chain");
                            return;
                        }
                    }
                    None => break None,
                }
            };

            let Some(summary) = summary else {
                // Driver torn down without a terminal event.
                warn!(url = %current.url(), "reply stream ended without completion");
                let failure = ReplySummary::failure(current.url().clone());
                let _ = self.events.send(ReplyEvent::Finished(failure));
                return;
            };

            match summary.redirect_target.clone() {
                Some(target) if self.hops_remaining > 0 => {
                    self.hops_remaining -= 1;
                    debug!(
                        from = %summary.url,
                        to = %target,
                        remaining = self.hops_remaining,
                        "following redirect"
                    );
                    let mut next = current.request().clone();
                    next.url = target;
                    let next = self.decorator.decorate(next);
                    // Release the superseded hop before dispatching its successor.
                    drop(current);
                    current = self.transport.dispatch(next);
                }
                Some(target) => {
                    debug!(%target, "redirect budget exhausted, surfacing redirect response");
                    let _ = self.events.send(ReplyEvent::Finished(summary));
                    return;
                }
                None => {
                    let _ = self.events.send(ReplyEvent::Finished(summary));
                    return;
                }
            }
        }
    }
}
