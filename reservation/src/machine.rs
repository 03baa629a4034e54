//! Per-session reservation state machine.
//!
//! A [`ReservationStateMachine`] is scoped to one session id. It observes
//! three independent store channels and writes requests to the user's
//! request queue:
//!
//! - seat availability (`sessionFull` on the session's seat document)
//! - confirmed [`ReservationStatus`] for the signed-in user
//! - the [`ReservationOutcome`] of the user's last request
//!
//! Confirmed state only ever changes when the store pushes an update.
//! Issuing a request changes nothing locally; the outcome comes back on the
//! result and status channels, in no particular order relative to each
//! other.
//!
//! Listeners are released on every exit path: explicitly through
//! [`ReservationStateMachine::remove_update_listeners`], per listener via
//! its [`SubscriptionHandle`], and on drop.

use std::sync::Arc;

use common::logger::{TraceId, child_span, root_span};
use common::time::now_ms;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{Instrument, Span, debug, error, field, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReservationConfig;
use crate::document::{Document, ReservationOutcome, SeatAvailabilityDoc, UserSessionDoc};
use crate::error::{ListenerError, ReservationError, StoreError};
use crate::identity::IdentityProvider;
use crate::model::{ReservationResult, ReservationStatus, SessionId, UserId};
use crate::planner::ToggleAction;
use crate::request::{RequestAction, ReservationRequest};
use crate::store::ReservationStore;
use crate::subscription::{Channel, SubscriptionHandle};

type ErrorSink = Arc<Mutex<Box<dyn FnMut(&ListenerError) + Send>>>;

/// Identifies one posted result. The timestamp separates identical results
/// from repeated requests when the server omits `requestId`.
type ResultKey = (ReservationResult, Option<String>, Option<i64>);

/// Latest values observed across all listeners.
#[derive(Debug, Default)]
struct Observed {
    seats_available: bool,
    status: Option<ReservationStatus>,
    last_outcome: Option<ReservationOutcome>,
}

struct QueuedWrite {
    user_id: UserId,
    request: ReservationRequest,
}

pub struct ReservationStateMachine {
    session_id: SessionId,
    store: Arc<dyn ReservationStore>,
    identity: Arc<dyn IdentityProvider>,
    config: ReservationConfig,
    runtime: Handle,
    trace_id: TraceId,

    observed: Arc<RwLock<Observed>>,
    listeners: Mutex<Vec<SubscriptionHandle>>,
    error_sink: Arc<Mutex<Option<ErrorSink>>>,

    /// Feeds the single writer task, which keeps requests in issue order.
    writer: UnboundedSender<QueuedWrite>,
}

impl ReservationStateMachine {
    /// Creates a machine for `session_id`. Must be called inside a Tokio
    /// runtime; listeners and the request writer run on it.
    pub fn new(
        session_id: impl Into<SessionId>,
        store: Arc<dyn ReservationStore>,
        identity: Arc<dyn IdentityProvider>,
        config: ReservationConfig,
    ) -> Result<Self, ReservationError> {
        let session_id = session_id.into();
        let runtime = Handle::try_current().map_err(|_| ReservationError::NoRuntime)?;

        let trace_id = TraceId::default();
        let (writer, rx) = mpsc::unbounded_channel();
        let span = root_span("reservation_writer", &trace_id);
        span.record("session_id", field::display(&session_id));
        runtime.spawn(run_writer(Arc::clone(&store), rx).instrument(span));

        debug!(%session_id, "reservation state machine created");

        Ok(Self {
            session_id,
            store,
            identity,
            config,
            runtime,
            trace_id,
            observed: Arc::new(RwLock::new(Observed::default())),
            listeners: Mutex::new(Vec::new()),
            error_sink: Arc::new(Mutex::new(None)),
            writer,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Shared by the writer span and every listener span of this machine.
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// `true` when the server reports free seats. `false` until the first
    /// seat snapshot arrives.
    pub fn seats_available(&self) -> bool {
        self.observed.read().seats_available
    }

    /// Confirmed status, `None` until the first status snapshot arrives.
    pub fn reservation_status(&self) -> Option<ReservationStatus> {
        self.observed.read().status
    }

    /// Most recent result delivered to a result listener.
    pub fn last_outcome(&self) -> Option<ReservationOutcome> {
        self.observed.read().last_outcome.clone()
    }

    pub fn active_listeners(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|h| h.is_active());
        listeners.len()
    }

    /// Receives every listener error in addition to the log line. Replaces
    /// any previously registered sink; a sink may replace itself.
    pub fn on_listener_error<F>(&self, callback: F)
    where
        F: FnMut(&ListenerError) + Send + 'static,
    {
        *self.error_sink.lock() = Some(Arc::new(Mutex::new(Box::new(callback))));
    }

    /// Calls `callback` with the seat availability on the first snapshot and
    /// whenever it changes. Seat documents are per session, so no signed-in
    /// user is needed.
    pub fn on_seat_availability_update<F>(&self, mut callback: F) -> SubscriptionHandle
    where
        F: FnMut(bool) + Send + 'static,
    {
        let session_id = self.session_id.clone();
        let observed = Arc::clone(&self.observed);
        let errors = Arc::clone(&self.error_sink);
        let missing_means_full = self.config.missing_seat_doc_means_full;
        let mut last: Option<bool> = None;

        let stream = self.store.watch_seat_availability(&self.session_id);
        let span = self.listener_span("seat_availability", None);

        let handle = SubscriptionHandle::spawn(
            &self.runtime,
            Channel::SeatAvailability,
            span,
            stream,
            move |item: Result<Option<Document>, StoreError>| {
                let doc = match item {
                    Ok(doc) => doc,
                    Err(source) => {
                        return report_error(&errors, Channel::SeatAvailability, &session_id, source);
                    }
                };

                let parsed = SeatAvailabilityDoc::from_document(doc.as_ref());
                if let Some(raw) = parsed.session_full.malformed_raw() {
                    warn!(%session_id, raw, "malformed sessionFull flag");
                }

                let available = parsed.seats_available(missing_means_full);
                observed.write().seats_available = available;

                if last != Some(available) {
                    last = Some(available);
                    debug!(%session_id, available, "seat availability changed");
                    callback(available);
                }
            },
        );

        self.keep(handle)
    }

    /// Calls `callback` with the confirmed status on the first snapshot and
    /// whenever it changes. Declines (returns `None`) without a signed-in
    /// user.
    pub fn on_reservation_status_update<F>(&self, mut callback: F) -> Option<SubscriptionHandle>
    where
        F: FnMut(ReservationStatus) + Send + 'static,
    {
        let Some(user_id) = self.identity.current_user() else {
            warn!(session_id = %self.session_id, "no signed-in user; status listener not attached");
            return None;
        };

        let session_id = self.session_id.clone();
        let observed = Arc::clone(&self.observed);
        let errors = Arc::clone(&self.error_sink);
        let mut last: Option<ReservationStatus> = None;

        let stream = self.store.watch_user_session(&user_id, &self.session_id);
        let span = self.listener_span("reservation_status", Some(&user_id));

        let handle = SubscriptionHandle::spawn(
            &self.runtime,
            Channel::ReservationStatus,
            span,
            stream,
            move |item: Result<Option<Document>, StoreError>| {
                let doc = match item {
                    Ok(doc) => doc,
                    Err(source) => {
                        return report_error(&errors, Channel::ReservationStatus, &session_id, source);
                    }
                };

                let parsed = UserSessionDoc::from_document(doc.as_ref());
                if let Some(raw) = parsed.status.malformed_raw() {
                    warn!(%session_id, raw, "unrecognised reservation status; treating as none");
                }

                let status = parsed.status_or_none();
                observed.write().status = Some(status);

                if last != Some(status) {
                    last = Some(status);
                    info!(%session_id, %status, "reservation status changed");
                    callback(status);
                }
            },
        );

        Some(self.keep(handle))
    }

    /// Calls `callback` whenever the server posts a new result for this
    /// session.
    ///
    /// The first snapshot after attaching is swallowed unless
    /// `sends_initial_reservation_result_state` is set, and a snapshot whose
    /// `(result, requestId)` matches the previous one is not reported again.
    /// Declines (returns `None`) without a signed-in user.
    pub fn on_reservation_result_update<F>(&self, mut callback: F) -> Option<SubscriptionHandle>
    where
        F: FnMut(ReservationOutcome) + Send + 'static,
    {
        let Some(user_id) = self.identity.current_user() else {
            warn!(session_id = %self.session_id, "no signed-in user; result listener not attached");
            return None;
        };

        let session_id = self.session_id.clone();
        let observed = Arc::clone(&self.observed);
        let errors = Arc::clone(&self.error_sink);
        let sends_initial = self.config.sends_initial_reservation_result_state;
        let mut first = true;
        let mut last: Option<ResultKey> = None;

        let stream = self.store.watch_user_session(&user_id, &self.session_id);
        let span = self.listener_span("reservation_result", Some(&user_id));

        let handle = SubscriptionHandle::spawn(
            &self.runtime,
            Channel::ReservationResult,
            span,
            stream,
            move |item: Result<Option<Document>, StoreError>| {
                let doc = match item {
                    Ok(doc) => doc,
                    Err(source) => {
                        return report_error(&errors, Channel::ReservationResult, &session_id, source);
                    }
                };

                let parsed = UserSessionDoc::from_document(doc.as_ref());
                if let Some(raw) = parsed.result.malformed_raw() {
                    warn!(%session_id, raw, "unrecognised reservation result; dropped");
                }

                let outcome = parsed.outcome();
                let key = outcome
                    .as_ref()
                    .map(|o| (o.result, o.request_id.clone(), o.timestamp));

                if std::mem::take(&mut first) && !sends_initial {
                    debug!(%session_id, "initial result snapshot suppressed");
                    last = key;
                    return;
                }

                let Some(outcome) = outcome else {
                    return;
                };
                if last == key {
                    return;
                }
                last = key;

                info!(%session_id, result = %outcome.result, request_id = ?outcome.request_id, "reservation result received");
                observed.write().last_outcome = Some(outcome.clone());
                callback(outcome);
            },
        );

        Some(self.keep(handle))
    }

    /// Requests a seat (or waitlist spot) on this session.
    pub fn attempt_reservation(&self) -> Option<Uuid> {
        self.submit(RequestAction::Reserve {
            session_id: self.session_id.clone(),
        })
    }

    /// Requests cancellation of this session's reservation or waitlisting.
    pub fn attempt_cancellation(&self) -> Option<Uuid> {
        self.submit(RequestAction::Cancel {
            session_id: self.session_id.clone(),
        })
    }

    /// Requests an atomic cancel of `conflicting` plus reserve of this
    /// session. `conflicting` should come from the clash detector.
    ///
    /// An empty id or this session's own id is a caller bug and is rejected.
    pub fn attempt_swap(&self, conflicting: &SessionId) -> Result<Option<Uuid>, ReservationError> {
        if conflicting.is_empty() {
            return Err(ReservationError::EmptyConflictingSession);
        }
        if conflicting == &self.session_id {
            return Err(ReservationError::SelfSwap(conflicting.clone()));
        }

        Ok(self.submit(RequestAction::Swap {
            reserve: self.session_id.clone(),
            cancel: conflicting.clone(),
        }))
    }

    /// Issues the request chosen by [`crate::plan_toggle`].
    pub fn apply(&self, action: &ToggleAction) -> Result<Option<Uuid>, ReservationError> {
        match action {
            ToggleAction::Reserve => Ok(self.attempt_reservation()),
            ToggleAction::Cancel => Ok(self.attempt_cancellation()),
            ToggleAction::Swap { cancel } => self.attempt_swap(cancel),
        }
    }

    /// Detaches every listener. Idempotent; also runs on drop.
    pub fn remove_update_listeners(&self) {
        let handles: Vec<_> = self.listeners.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        for handle in &handles {
            handle.cancel();
        }
        debug!(session_id = %self.session_id, count = handles.len(), "update listeners removed");
    }

    /// Stamps and queues a request. Returns immediately; the write happens on
    /// the writer task and its outcome arrives on the listeners.
    #[instrument(skip(self, action), fields(session_id = %self.session_id, action = %action.action_type()))]
    fn submit(&self, action: RequestAction) -> Option<Uuid> {
        let Some(user_id) = self.identity.current_user() else {
            warn!("no signed-in user; reservation request not sent");
            return None;
        };

        let request = ReservationRequest::new(action, now_ms());
        let request_id = request.request_id;

        if self.writer.send(QueuedWrite { user_id, request }).is_err() {
            error!(%request_id, "request writer stopped; reservation request dropped");
            return None;
        }

        debug!(%request_id, "reservation request queued");
        Some(request_id)
    }

    fn keep(&self, handle: SubscriptionHandle) -> SubscriptionHandle {
        self.listeners.lock().push(handle.clone());
        handle
    }

    fn listener_span(&self, name: &'static str, user_id: Option<&UserId>) -> Span {
        let span = root_span(name, &self.trace_id);
        span.record("session_id", field::display(&self.session_id));
        if let Some(user_id) = user_id {
            span.record("user_id", field::display(user_id));
        }
        span
    }
}

impl Drop for ReservationStateMachine {
    fn drop(&mut self) {
        self.remove_update_listeners();
    }
}

fn report_error(
    sink: &Mutex<Option<ErrorSink>>,
    channel: Channel,
    session_id: &SessionId,
    source: StoreError,
) {
    let err = ListenerError {
        channel,
        session_id: session_id.clone(),
        source,
    };
    warn!(error = %err, "listener error; no update delivered");

    // Released before the call so the sink can re-register.
    let current = sink.lock().clone();
    if let Some(callback) = current {
        let mut callback = callback.lock();
        (*callback)(&err);
    }
}

async fn run_writer(store: Arc<dyn ReservationStore>, mut rx: UnboundedReceiver<QueuedWrite>) {
    while let Some(QueuedWrite { user_id, request }) = rx.recv().await {
        let request_id = request.request_id;
        let action = request.action_type();

        let doc = match request.to_document() {
            Ok(doc) => doc,
            Err(e) => {
                error!(%request_id, error = ?e, "failed to encode reservation request");
                continue;
            }
        };

        let span = child_span("queue_write");
        span.record("user_id", field::display(&user_id));

        match store.write_queue_request(&user_id, doc).instrument(span).await {
            Ok(()) => info!(%request_id, %action, %user_id, "reservation request written"),
            Err(e) => warn!(%request_id, %action, %user_id, error = ?e, "reservation request write failed"),
        }
    }

    debug!("request writer shut down");
}
