#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use reservation::document::{ReservationOutcome, UserSessionDoc};
use reservation::store::memory::MemoryStore;
use reservation::{
    ClashDetector, RequestAction, ReservationRequest, ReservationResult, ReservationStatus,
    ReservedSession, Session, SessionId, UserId,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 12, h, m, 0).unwrap()
}

pub fn session(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Session {
    Session::new(id, "room-1", start, end)
}

/// Waits for the next value on a forwarding channel, failing after a second.
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("update channel closed")
}

/// Asserts nothing arrives within a short grace period.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let got = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(got.is_err(), "unexpected update: {:?}", got);
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Forwarding callback: every invocation is pushed onto the returned channel.
pub fn forward<T: Send + 'static>() -> (impl FnMut(T) + Send + 'static, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |v: T| {
            let _ = tx.send(v);
        },
        rx,
    )
}

struct ServerState {
    capacity: HashMap<SessionId, usize>,
    statuses: HashMap<(UserId, SessionId), ReservationStatus>,
}

/// Stand-in for the server that processes request queues and arbitrates
/// seats. Writes confirmed status, results and seat flags back into the
/// `MemoryStore`.
pub struct FakeServer {
    store: Arc<MemoryStore>,
    sessions: Vec<Session>,
    now: DateTime<Utc>,
    cutoff: chrono::Duration,
    state: Mutex<ServerState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FakeServer {
    /// `capacity` lists seats per session; unlisted sessions get 10.
    pub fn new(
        store: Arc<MemoryStore>,
        sessions: Vec<Session>,
        capacity: &[(&str, usize)],
        now: DateTime<Utc>,
    ) -> Arc<Self> {
        let mut seats: HashMap<SessionId, usize> =
            sessions.iter().map(|s| (s.id.clone(), 10)).collect();
        for (id, n) in capacity {
            seats.insert(SessionId::from(*id), *n);
        }

        let server = Arc::new(Self {
            store,
            sessions,
            now,
            cutoff: chrono::Duration::hours(1),
            state: Mutex::new(ServerState {
                capacity: seats,
                statuses: HashMap::new(),
            }),
            workers: Mutex::new(Vec::new()),
        });

        for s in &server.sessions {
            server.publish_seats(&s.id);
        }
        server
    }

    /// Starts processing `user_id`'s request queue.
    pub fn serve(self: &Arc<Self>, user_id: &str) {
        let user_id = UserId::new(user_id);
        let mut queue = self.store.watch_queue(&user_id);
        let server = Arc::clone(self);

        let worker = tokio::spawn(async move {
            while let Some(item) = queue.next().await {
                let Ok(Some(doc)) = item else { continue };
                if let Some(request) = ReservationRequest::from_document(&doc) {
                    server.process(&user_id, &request);
                }
            }
        });
        self.workers.lock().push(worker);
    }

    /// Seeds a confirmed status without going through a request.
    pub fn seed(&self, user_id: &str, session_id: &str, status: ReservationStatus) {
        let user_id = UserId::new(user_id);
        let session_id = SessionId::from(session_id);
        self.state
            .lock()
            .statuses
            .insert((user_id.clone(), session_id.clone()), status);
        self.store.set_user_session(
            &user_id,
            &session_id,
            Some(UserSessionDoc::to_document(status, None)),
        );
        self.publish_seats(&session_id);
    }

    pub fn status(&self, user_id: &str, session_id: &str) -> ReservationStatus {
        self.state
            .lock()
            .statuses
            .get(&(UserId::new(user_id), SessionId::from(session_id)))
            .copied()
            .unwrap_or_default()
    }

    fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    fn reserved_count(state: &ServerState, session_id: &SessionId) -> usize {
        state
            .statuses
            .iter()
            .filter(|((_, s), st)| s == session_id && **st == ReservationStatus::Reserved)
            .count()
    }

    fn publish_seats(&self, session_id: &SessionId) {
        let full = {
            let state = self.state.lock();
            let cap = state.capacity.get(session_id).copied().unwrap_or(0);
            Self::reserved_count(&state, session_id) >= cap
        };
        self.store.set_seat_availability(session_id, full);
    }

    fn held_by(state: &ServerState, user_id: &UserId) -> Vec<ReservedSession> {
        let mut held: Vec<_> = state
            .statuses
            .iter()
            .filter(|((u, _), st)| u == user_id && st.is_held())
            .map(|((_, s), st)| ReservedSession::new(s.clone(), *st, 0))
            .collect();
        held.sort_by(|a, b| a.id.cmp(&b.id));
        held
    }

    fn clashes_for(&self, state: &ServerState, user_id: &UserId, candidate: &Session, ignore: Option<&SessionId>) -> bool {
        let held: Vec<_> = Self::held_by(state, user_id)
            .into_iter()
            .filter(|r| Some(&r.id) != ignore)
            .collect();
        ClashDetector::new(&self.sessions, &held).has_clash(candidate)
    }

    fn seat_or_waitlist(state: &ServerState, session_id: &SessionId) -> ReservationStatus {
        let cap = state.capacity.get(session_id).copied().unwrap_or(0);
        if Self::reserved_count(state, session_id) < cap {
            ReservationStatus::Reserved
        } else {
            ReservationStatus::Waitlisted
        }
    }

    fn process(&self, user_id: &UserId, request: &ReservationRequest) {
        let mut writes: Vec<(SessionId, ReservationStatus, ReservationResult)> = Vec::new();

        {
            let mut state = self.state.lock();
            let current = |state: &ServerState, s: &SessionId| {
                state
                    .statuses
                    .get(&(user_id.clone(), s.clone()))
                    .copied()
                    .unwrap_or_default()
            };

            match &request.action {
                RequestAction::Reserve { session_id } => {
                    let status = current(&state, session_id);
                    let result = match self.session(session_id) {
                        None => ReservationResult::Unknown,
                        Some(s) if s.is_past_cutoff(self.now, self.cutoff) => {
                            ReservationResult::Cutoff
                        }
                        Some(s) if self.clashes_for(&state, user_id, s, None) => {
                            ReservationResult::Clash
                        }
                        Some(_) => match Self::seat_or_waitlist(&state, session_id) {
                            ReservationStatus::Reserved => ReservationResult::Reserved,
                            _ => ReservationResult::Waitlisted,
                        },
                    };
                    let next = result.expected_status().unwrap_or(status);
                    state
                        .statuses
                        .insert((user_id.clone(), session_id.clone()), next);
                    writes.push((session_id.clone(), next, result));
                }
                RequestAction::Cancel { session_id } => {
                    let status = current(&state, session_id);
                    let result = match self.session(session_id) {
                        Some(s) if s.is_past_cutoff(self.now, self.cutoff) => {
                            ReservationResult::CancelCutoff
                        }
                        Some(_) if status.is_held() => ReservationResult::Cancelled,
                        _ => ReservationResult::CancelUnknown,
                    };
                    let next = result.expected_status().unwrap_or(status);
                    state
                        .statuses
                        .insert((user_id.clone(), session_id.clone()), next);
                    writes.push((session_id.clone(), next, result));
                }
                RequestAction::Swap { reserve, cancel } => {
                    let reserve_status = current(&state, reserve);
                    let cancel_status = current(&state, cancel);
                    let result = match (self.session(reserve), self.session(cancel)) {
                        (Some(r), Some(c))
                            if r.is_past_cutoff(self.now, self.cutoff)
                                || c.is_past_cutoff(self.now, self.cutoff) =>
                        {
                            ReservationResult::SwapCutoff
                        }
                        (Some(_), Some(_)) if !cancel_status.is_held() => {
                            ReservationResult::SwapUnknown
                        }
                        (Some(r), Some(_))
                            if self.clashes_for(&state, user_id, r, Some(cancel)) =>
                        {
                            ReservationResult::SwapClash
                        }
                        (Some(_), Some(_)) => {
                            state
                                .statuses
                                .insert((user_id.clone(), cancel.clone()), ReservationStatus::None);
                            match Self::seat_or_waitlist(&state, reserve) {
                                ReservationStatus::Reserved => ReservationResult::Swapped,
                                _ => ReservationResult::SwapWaitlisted,
                            }
                        }
                        _ => ReservationResult::SwapUnknown,
                    };

                    if result.is_success() {
                        writes.push((cancel.clone(), ReservationStatus::None, ReservationResult::Cancelled));
                    }
                    let next = result.expected_status().unwrap_or(reserve_status);
                    state.statuses.insert((user_id.clone(), reserve.clone()), next);
                    writes.push((reserve.clone(), next, result));
                }
            }
        }

        for (session_id, status, result) in writes {
            let outcome = ReservationOutcome {
                result,
                request_id: Some(request.request_id.to_string()),
                timestamp: Some(common::time::now_ms()),
            };
            self.store.set_user_session(
                user_id,
                &session_id,
                Some(UserSessionDoc::to_document(status, Some(&outcome))),
            );
            self.publish_seats(&session_id);
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }
}
