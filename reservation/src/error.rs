use thiserror::Error;

use crate::model::SessionId;
use crate::subscription::Channel;

/// Failures reported by a [`crate::store::ReservationStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ReservationError {
    #[error("swap requires a non-empty conflicting session id")]
    EmptyConflictingSession,

    #[error("session {0} cannot be swapped with itself")]
    SelfSwap(SessionId),

    #[error("reservation state machine must be created inside a tokio runtime")]
    NoRuntime,
}

/// Error observed on one listener channel. The listener keeps running; the
/// consumer simply receives no update for the failed snapshot.
#[derive(Error, Debug)]
#[error("{channel} listener for session {session_id} failed: {source}")]
pub struct ListenerError {
    pub channel: Channel,
    pub session_id: SessionId,
    #[source]
    pub source: StoreError,
}
