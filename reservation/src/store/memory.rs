//! In-process [`ReservationStore`] backend.
//!
//! Documents live in a map keyed by path. Every watcher receives the value
//! current at subscription time, then each later write in commit order.
//! Server-side code (or a test) writes confirmed state through the
//! `set_*` methods. Fault injection covers the listener and write error
//! paths.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, instrument, warn};

use super::{CollectionStream, DocumentStream, ReservationStore};
use crate::document::{Document, SeatAvailabilityDoc};
use crate::error::StoreError;
use crate::model::{SessionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DocPath {
    Seats(SessionId),
    UserSession(UserId, SessionId),
    Queue(UserId),
}

type DocItem = Result<Option<Document>, StoreError>;
type CollectionItem = Result<Vec<(SessionId, Document)>, StoreError>;

#[derive(Default)]
struct DocSlot {
    value: Option<Document>,
    watchers: Vec<UnboundedSender<DocItem>>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<DocPath, DocSlot>,
    collections: HashMap<UserId, Vec<UnboundedSender<CollectionItem>>>,
    deny_watches: Option<String>,
    fail_writes: Option<String>,
}

impl Inner {
    fn collection_snapshot(&self, user_id: &UserId) -> Vec<(SessionId, Document)> {
        let mut docs: Vec<_> = self
            .docs
            .iter()
            .filter_map(|(path, slot)| match (path, &slot.value) {
                (DocPath::UserSession(u, s), Some(doc)) if u == user_id => {
                    Some((s.clone(), doc.clone()))
                }
                _ => None,
            })
            .collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs
    }

    fn write(&mut self, path: DocPath, value: Option<Document>) {
        let slot = self.docs.entry(path.clone()).or_default();
        slot.value = value.clone();
        slot.watchers
            .retain(|tx| tx.send(Ok(value.clone())).is_ok());

        if let DocPath::UserSession(user_id, _) = &path {
            let snapshot = self.collection_snapshot(user_id);
            if let Some(watchers) = self.collections.get_mut(user_id) {
                watchers.retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
            }
        }
    }

    fn watch(&mut self, path: DocPath) -> DocumentStream {
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(reason) = &self.deny_watches {
            let _ = tx.send(Err(StoreError::PermissionDenied(reason.clone())));
            return receiver_stream(rx);
        }

        let slot = self.docs.entry(path).or_default();
        if tx.send(Ok(slot.value.clone())).is_ok() {
            slot.watchers.push(tx);
        }
        receiver_stream(rx)
    }
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_seat_availability(&self, session_id: &SessionId, session_full: bool) {
        self.set_seat_document(session_id, Some(SeatAvailabilityDoc::to_document(session_full)));
    }

    /// Raw write of the seat document, `None` deletes it.
    pub fn set_seat_document(&self, session_id: &SessionId, doc: Option<Document>) {
        self.inner
            .lock()
            .write(DocPath::Seats(session_id.clone()), doc);
    }

    /// Raw write of a user's per-session document, `None` deletes it.
    pub fn set_user_session(&self, user_id: &UserId, session_id: &SessionId, doc: Option<Document>) {
        self.inner
            .lock()
            .write(DocPath::UserSession(user_id.clone(), session_id.clone()), doc);
    }

    pub fn user_session(&self, user_id: &UserId, session_id: &SessionId) -> Option<Document> {
        self.inner
            .lock()
            .docs
            .get(&DocPath::UserSession(user_id.clone(), session_id.clone()))
            .and_then(|slot| slot.value.clone())
    }

    /// Latest (unprocessed or not) request written for the user.
    pub fn queue_request(&self, user_id: &UserId) -> Option<Document> {
        self.inner
            .lock()
            .docs
            .get(&DocPath::Queue(user_id.clone()))
            .and_then(|slot| slot.value.clone())
    }

    /// Observes the user's request queue, as the server-side processor would.
    pub fn watch_queue(&self, user_id: &UserId) -> DocumentStream {
        self.inner.lock().watch(DocPath::Queue(user_id.clone()))
    }

    /// Removes the processed request so the next write is observed as new.
    pub fn clear_queue(&self, user_id: &UserId) {
        self.inner.lock().write(DocPath::Queue(user_id.clone()), None);
    }

    /// New watches fail with `PermissionDenied` while set.
    pub fn deny_watches(&self, reason: Option<&str>) {
        self.inner.lock().deny_watches = reason.map(str::to_string);
    }

    /// Queue writes fail with `Unavailable` while set.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.inner.lock().fail_writes = reason.map(str::to_string);
    }

    /// Pushes a transport error to every live watcher.
    pub fn inject_watch_error(&self, reason: &str) {
        let mut inner = self.inner.lock();
        for slot in inner.docs.values_mut() {
            slot.watchers
                .retain(|tx| tx.send(Err(StoreError::Unavailable(reason.to_string()))).is_ok());
        }
        for watchers in inner.collections.values_mut() {
            watchers.retain(|tx| tx.send(Err(StoreError::Unavailable(reason.to_string()))).is_ok());
        }
    }

    /// Number of subscriptions whose receiving side is still alive.
    pub fn active_watchers(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut count = 0;
        for slot in inner.docs.values_mut() {
            slot.watchers.retain(|tx| !tx.is_closed());
            count += slot.watchers.len();
        }
        for watchers in inner.collections.values_mut() {
            watchers.retain(|tx| !tx.is_closed());
            count += watchers.len();
        }
        count
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    fn watch_seat_availability(&self, session_id: &SessionId) -> DocumentStream {
        debug!(%session_id, "watching seat availability");
        self.inner.lock().watch(DocPath::Seats(session_id.clone()))
    }

    fn watch_user_session(&self, user_id: &UserId, session_id: &SessionId) -> DocumentStream {
        debug!(%user_id, %session_id, "watching user session document");
        self.inner
            .lock()
            .watch(DocPath::UserSession(user_id.clone(), session_id.clone()))
    }

    fn watch_user_reservations(&self, user_id: &UserId) -> CollectionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();

        if let Some(reason) = &inner.deny_watches {
            let _ = tx.send(Err(StoreError::PermissionDenied(reason.clone())));
            return receiver_stream(rx);
        }

        let snapshot = inner.collection_snapshot(user_id);
        if tx.send(Ok(snapshot)).is_ok() {
            inner.collections.entry(user_id.clone()).or_default().push(tx);
        }
        receiver_stream(rx)
    }

    #[instrument(skip(self, request))]
    async fn write_queue_request(
        &self,
        user_id: &UserId,
        request: Document,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        if let Some(reason) = &inner.fail_writes {
            warn!(reason = %reason, "rejecting queue write");
            return Err(StoreError::Unavailable(reason.clone()));
        }

        inner.write(DocPath::Queue(user_id.clone()), Some(request));
        Ok(())
    }
}
