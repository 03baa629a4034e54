pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::document::Document;
use crate::error::StoreError;
use crate::model::{SessionId, UserId};

/// Snapshots of one document: the current value on subscribe, then every
/// committed write in order. `None` means the document does not exist.
pub type DocumentStream = BoxStream<'static, Result<Option<Document>, StoreError>>;

/// Snapshots of every per-session document under one user.
pub type CollectionStream = BoxStream<'static, Result<Vec<(SessionId, Document)>, StoreError>>;

/// Backing store the reservation core observes and writes requests into.
///
/// Streams are long-lived; dropping one releases the underlying
/// subscription. Seat allocation itself happens behind this trait.
#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// Seat-availability document keyed by session id.
    fn watch_seat_availability(&self, session_id: &SessionId) -> DocumentStream;

    /// The user's document for one session (status + last result).
    fn watch_user_session(&self, user_id: &UserId, session_id: &SessionId) -> DocumentStream;

    /// All of the user's per-session documents.
    fn watch_user_reservations(&self, user_id: &UserId) -> CollectionStream;

    /// Overwrites the user's single request-queue document.
    async fn write_queue_request(
        &self,
        user_id: &UserId,
        request: Document,
    ) -> Result<(), StoreError>;
}
