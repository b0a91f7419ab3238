//! Event tags and handler plumbing.
//!
//! Element types carry a handler table computed once at registration: each
//! entry is a tag, a callable, and a per-tag argument (currently only the
//! period of periodic handlers). Handlers come in two flavors:
//!
//! - **Sync** handlers run inline and must not suspend. Synchronous
//!   `on_populate` handlers run during the build step so they can mutate
//!   state before `build()` reads it.
//! - **Async** handlers return a future which the session awaits outside the
//!   refresh lock, followed by a refresh.
//!
//! Handlers return `Result`; failures are logged and never crash the session.

use std::sync::Arc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use ripple_foundation::ElementId;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::Session;

/// Internal marker for when a handler must be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    /// Once per creation or successful reconciliation, before `build()`.
    OnPopulate,
    /// After the element first appears in the live tree following a refresh.
    OnMount,
    /// After the element disappears from the live tree.
    OnUnmount,
    /// When the session navigates to a different page.
    OnPageChange,
    /// When the client window is resized.
    OnWindowSizeChange,
    /// At a fixed interval, for as long as the element exists.
    Periodic,
}

/// A synchronous handler. Must not suspend.
pub type SyncHandlerFn = Arc<dyn Fn(&Session, ElementId) -> Result<()> + Send + Sync>;

/// An asynchronous handler. The returned future is awaited outside the
/// refresh lock.
pub type AsyncHandlerFn =
    Arc<dyn Fn(Session, ElementId) -> LocalBoxFuture<'static, Result<()>> + Send + Sync>;

/// Either flavor of handler.
#[derive(Clone)]
pub enum HandlerFn {
    /// Runs inline.
    Sync(SyncHandlerFn),
    /// Returns a future.
    Async(AsyncHandlerFn),
}

impl std::fmt::Debug for HandlerFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("HandlerFn::Sync"),
            Self::Async(_) => f.write_str("HandlerFn::Async"),
        }
    }
}

/// One entry in an element type's handler table.
#[derive(Debug, Clone)]
pub struct EventHandler {
    /// When to call.
    pub tag: EventTag,
    /// What to call.
    pub func: HandlerFn,
    /// Per-tag configuration: the interval of periodic handlers.
    pub period: Option<Duration>,
}

/// Call a handler, logging instead of propagating failures.
///
/// Sync handlers run inline. Async handlers are scheduled as a session task
/// which refreshes the session once the handler completes; the caller is
/// responsible for refreshing after sync handlers.
pub(crate) fn call_handler_detached(session: &Session, handler: &HandlerFn, element: ElementId) {
    match handler {
        HandlerFn::Sync(func) => {
            if let Err(err) = func(session, element) {
                warn!(%element, %err, "event handler failed");
            }
        }
        HandlerFn::Async(func) => {
            let fut = func(session.clone(), element);
            let session = session.clone();
            session.clone().create_task(
                async move {
                    if let Err(err) = fut.await {
                        warn!(%element, %err, "event handler failed");
                    }
                    if let Err(err) = session.refresh().await {
                        warn!(%err, "refresh after event handler failed");
                    }
                },
                "event handler",
            );
        }
    }
}

/// Call a handler and wait for it, logging instead of propagating failures.
pub(crate) async fn call_handler_awaited(
    session: &Session,
    handler: &HandlerFn,
    element: ElementId,
) {
    let result = match handler {
        HandlerFn::Sync(func) => func(session, element),
        HandlerFn::Async(func) => func(session.clone(), element).await,
    };
    if let Err(err) = result {
        warn!(%element, %err, "event handler failed");
    }
}

/// Worker task driving one periodic handler.
///
/// Sleeps the configured interval, waits for an active client connection,
/// fires the handler, then refreshes. The interval only restarts after the
/// handler finished, so a handler never runs twice in parallel. The task
/// exits once the element is gone.
pub(crate) async fn periodic_worker(
    session: std::rc::Weak<crate::session::SessionInner>,
    element: ElementId,
    handler: HandlerFn,
    period: Duration,
) {
    loop {
        tokio::time::sleep(period).await;

        let Some(session) = session.upgrade().map(Session::from_inner) else {
            return;
        };

        // Don't run periodic code while we aren't sure the client comes back.
        session.connected().wait().await;

        if !session.is_alive(element) {
            debug!(%element, "periodic worker exiting, element is gone");
            return;
        }

        call_handler_awaited(&session, &handler, element).await;

        if let Err(err) = session.refresh().await {
            warn!(%err, "refresh after periodic handler failed");
        }
    }
}
