use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::error::StoreError;
use crate::model::SessionId;

/// Action written to the user's request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationQueueActionType {
    #[serde(rename = "RESERVE")]
    Reserve,
    #[serde(rename = "CANCEL")]
    Cancel,
    #[serde(rename = "SWAP")]
    Swap,
}

impl ReservationQueueActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationQueueActionType::Reserve => "RESERVE",
            ReservationQueueActionType::Cancel => "CANCEL",
            ReservationQueueActionType::Swap => "SWAP",
        }
    }
}

impl fmt::Display for ReservationQueueActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request asks the server to do. A swap cancels `cancel` and
/// reserves `reserve` atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAction {
    Reserve { session_id: SessionId },
    Cancel { session_id: SessionId },
    Swap { reserve: SessionId, cancel: SessionId },
}

impl RequestAction {
    pub fn action_type(&self) -> ReservationQueueActionType {
        match self {
            RequestAction::Reserve { .. } => ReservationQueueActionType::Reserve,
            RequestAction::Cancel { .. } => ReservationQueueActionType::Cancel,
            RequestAction::Swap { .. } => ReservationQueueActionType::Swap,
        }
    }

    /// Session whose outcome the request reports on.
    pub fn target(&self) -> &SessionId {
        match self {
            RequestAction::Reserve { session_id } | RequestAction::Cancel { session_id } => {
                session_id
            }
            RequestAction::Swap { reserve, .. } => reserve,
        }
    }
}

/// One entry of the per-user request queue. Writing a new request
/// overwrites any unprocessed one; the latest request wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub request_id: Uuid,
    /// Client-side creation time, epoch milliseconds.
    pub timestamp_ms: i64,
    pub action: RequestAction,
}

/// Wire shape of the queue document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueDoc {
    request_id: String,
    timestamp: i64,
    action: ReservationQueueActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reserve_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancel_session_id: Option<SessionId>,
}

impl ReservationRequest {
    /// Fresh request with a v4 request id stamped at `timestamp_ms`.
    pub fn new(action: RequestAction, timestamp_ms: i64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp_ms,
            action,
        }
    }

    pub fn action_type(&self) -> ReservationQueueActionType {
        self.action.action_type()
    }

    pub fn to_document(&self) -> Result<Document, StoreError> {
        let (session_id, reserve_session_id, cancel_session_id) = match &self.action {
            RequestAction::Reserve { session_id } | RequestAction::Cancel { session_id } => {
                (Some(session_id.clone()), None, None)
            }
            RequestAction::Swap { reserve, cancel } => {
                (None, Some(reserve.clone()), Some(cancel.clone()))
            }
        };

        let doc = QueueDoc {
            request_id: self.request_id.to_string(),
            timestamp: self.timestamp_ms,
            action: self.action_type(),
            session_id,
            reserve_session_id,
            cancel_session_id,
        };

        match serde_json::to_value(doc)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(StoreError::Unavailable(
                "queue request did not encode to an object".into(),
            )),
        }
    }

    /// Decodes a queue document; `None` when required fields are missing
    /// or the action does not carry the ids it needs.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let raw: QueueDoc =
            serde_json::from_value(serde_json::Value::Object(doc.clone())).ok()?;
        let request_id = Uuid::parse_str(&raw.request_id).ok()?;

        let action = match raw.action {
            ReservationQueueActionType::Reserve => RequestAction::Reserve {
                session_id: raw.session_id?,
            },
            ReservationQueueActionType::Cancel => RequestAction::Cancel {
                session_id: raw.session_id?,
            },
            ReservationQueueActionType::Swap => RequestAction::Swap {
                reserve: raw.reserve_session_id?,
                cancel: raw.cancel_session_id?,
            },
        };

        Some(Self {
            request_id,
            timestamp_ms: raw.timestamp,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reserve_document_carries_session_id_only() {
        let req = ReservationRequest::new(
            RequestAction::Reserve {
                session_id: "s1".into(),
            },
            1_700_000_000_000,
        );
        let doc = req.to_document().unwrap();

        assert_eq!(doc["action"], json!("RESERVE"));
        assert_eq!(doc["sessionId"], json!("s1"));
        assert_eq!(doc["timestamp"], json!(1_700_000_000_000i64));
        assert_eq!(doc["requestId"], json!(req.request_id.to_string()));
        assert!(!doc.contains_key("reserveSessionId"));
        assert!(!doc.contains_key("cancelSessionId"));
    }

    #[test]
    fn swap_document_carries_pair_and_no_session_id() {
        let req = ReservationRequest::new(
            RequestAction::Swap {
                reserve: "A".into(),
                cancel: "B".into(),
            },
            5,
        );
        let doc = req.to_document().unwrap();

        assert_eq!(doc["action"], json!("SWAP"));
        assert_eq!(doc["reserveSessionId"], json!("A"));
        assert_eq!(doc["cancelSessionId"], json!("B"));
        assert!(!doc.contains_key("sessionId"));
    }

    #[test]
    fn every_request_gets_a_fresh_id() {
        let action = RequestAction::Cancel {
            session_id: "s1".into(),
        };
        let a = ReservationRequest::new(action.clone(), 1);
        let b = ReservationRequest::new(action, 1);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn decoding_rejects_swap_without_cancel_target() {
        let doc = json!({
            "requestId": Uuid::new_v4().to_string(),
            "timestamp": 1,
            "action": "SWAP",
            "reserveSessionId": "A",
        });
        let serde_json::Value::Object(map) = doc else {
            unreachable!()
        };

        assert!(ReservationRequest::from_document(&map).is_none());
    }

    #[test]
    fn decoding_restores_written_request() {
        let req = ReservationRequest::new(
            RequestAction::Cancel {
                session_id: "s9".into(),
            },
            42,
        );
        let doc = req.to_document().unwrap();
        assert_eq!(ReservationRequest::from_document(&doc), Some(req));
    }

    #[test]
    fn target_of_swap_is_the_reserved_session() {
        let action = RequestAction::Swap {
            reserve: "A".into(),
            cancel: "B".into(),
        };
        assert_eq!(action.target(), &SessionId::from("A"));
    }
}
