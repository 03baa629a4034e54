use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use crate::config::ReservationConfig;
use crate::document::{Document, UserSessionDoc};
use crate::error::{ReservationError, StoreError};
use crate::identity::IdentityProvider;
use crate::model::{ReservationStatus, ReservedSession, Session, SessionId, UserId};
use crate::store::ReservationStore;
use crate::subscription::{Channel, SubscriptionHandle};

/// Read access to the synchronised session list.
pub trait SessionProvider: Send + Sync {
    fn sessions(&self) -> &[Session];

    fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions().iter().find(|s| &s.id == id)
    }
}

/// Plain in-memory session list.
#[derive(Debug, Clone, Default)]
pub struct SessionCatalog {
    sessions: Vec<Session>,
}

impl SessionCatalog {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self { sessions }
    }
}

impl SessionProvider for SessionCatalog {
    fn sessions(&self) -> &[Session] {
        &self.sessions
    }
}

/// Change notifications published by a [`ReservationTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationEvent {
    StatusChanged {
        session_id: SessionId,
        status: ReservationStatus,
    },
    /// Tracked state was dropped (user changed or signed out).
    Cleared,
}

#[derive(Default)]
struct TrackerState {
    user: Option<UserId>,
    sessions: BTreeMap<SessionId, ReservedSession>,
}

/// Keeps the signed-in user's reservations in sync with the store.
///
/// This is what [`crate::ClashDetector`] reads its second input from.
/// Changes go out on a broadcast channel owned by the tracker, so
/// listeners live only as long as the tracker does.
pub struct ReservationTracker {
    store: Arc<dyn ReservationStore>,
    identity: Arc<dyn IdentityProvider>,
    runtime: Handle,
    state: Arc<RwLock<TrackerState>>,
    events: broadcast::Sender<ReservationEvent>,
    listener: Mutex<Option<SubscriptionHandle>>,
}

impl ReservationTracker {
    /// Creates the tracker and binds it to the current user, if any.
    pub fn new(
        store: Arc<dyn ReservationStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &ReservationConfig,
    ) -> Result<Self, ReservationError> {
        let runtime = Handle::try_current().map_err(|_| ReservationError::NoRuntime)?;
        let (events, _) = broadcast::channel(config.broadcast_capacity);

        let tracker = Self {
            store,
            identity,
            runtime,
            state: Arc::new(RwLock::new(TrackerState::default())),
            events,
            listener: Mutex::new(None),
        };
        tracker.rebind();
        Ok(tracker)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservationEvent> {
        self.events.subscribe()
    }

    /// Sessions the user holds as reserved or waitlisted, ordered by id.
    pub fn reserved_sessions(&self) -> Vec<ReservedSession> {
        self.state.read().sessions.values().cloned().collect()
    }

    pub fn reservation_status(&self, session_id: &SessionId) -> ReservationStatus {
        self.state
            .read()
            .sessions
            .get(session_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn user(&self) -> Option<UserId> {
        self.state.read().user.clone()
    }

    /// Re-subscribes for whoever is signed in now. Returns false (and tracks
    /// nothing) when nobody is.
    pub fn rebind(&self) -> bool {
        self.detach();

        let had_state = {
            let mut state = self.state.write();
            let had = !state.sessions.is_empty() || state.user.is_some();
            state.sessions.clear();
            state.user = None;
            had
        };
        if had_state {
            let _ = self.events.send(ReservationEvent::Cleared);
        }

        let Some(user_id) = self.identity.current_user() else {
            warn!("no signed-in user; reservation tracker left unbound");
            return false;
        };

        self.state.write().user = Some(user_id.clone());

        let stream = self.store.watch_user_reservations(&user_id);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let span = info_span!("reservation_tracker", %user_id);
        let tracked_user = user_id.clone();

        let handle = SubscriptionHandle::spawn(
            &self.runtime,
            Channel::Reservations,
            span,
            stream,
            move |item: Result<Vec<(SessionId, Document)>, StoreError>| match item {
                Ok(docs) => apply_snapshot(&state, &events, docs),
                Err(err) => {
                    warn!(user_id = %tracked_user, error = %err, "reservation listener error; no update delivered");
                }
            },
        );

        *self.listener.lock() = Some(handle);
        info!(%user_id, "reservation tracker bound");
        true
    }

    /// Stops syncing. Tracked state is kept until the next `rebind`.
    pub fn detach(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.cancel();
        }
    }
}

impl Drop for ReservationTracker {
    fn drop(&mut self) {
        self.detach();
    }
}

fn apply_snapshot(
    state: &RwLock<TrackerState>,
    events: &broadcast::Sender<ReservationEvent>,
    docs: Vec<(SessionId, Document)>,
) {
    let mut next = BTreeMap::new();

    for (session_id, doc) in docs {
        let parsed = UserSessionDoc::from_document(Some(&doc));
        if let Some(raw) = parsed.status.malformed_raw() {
            warn!(%session_id, raw, "unrecognised reservation status; treating as none");
        }

        let status = parsed.status_or_none();
        if status.is_held() {
            let timestamp = parsed.result_timestamp.unwrap_or_else(|| {
                debug!(%session_id, "no result timestamp; reservation timestamp set to 0");
                0
            });
            next.insert(
                session_id.clone(),
                ReservedSession::new(session_id, status, timestamp),
            );
        }
    }

    let mut changes = Vec::new();
    {
        let mut guard = state.write();

        for (id, prev) in &guard.sessions {
            match next.get(id) {
                None => changes.push((id.clone(), ReservationStatus::None)),
                Some(r) if r.status != prev.status => changes.push((id.clone(), r.status)),
                Some(_) => {}
            }
        }
        for (id, r) in &next {
            if !guard.sessions.contains_key(id) {
                changes.push((id.clone(), r.status));
            }
        }

        guard.sessions = next;
    }

    debug!(changes = changes.len(), "reservation snapshot applied");
    for (session_id, status) in changes {
        // No receivers is fine.
        let _ = events.send(ReservationEvent::StatusChanged { session_id, status });
    }
}
