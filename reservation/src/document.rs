//! Remote-store document shapes and the parse boundary into closed enums.
//!
//! Documents arrive as loosely typed JSON objects. Every field read goes
//! through [`Decoded`], which keeps unrecognised raw values around so they
//! can be logged before the state machine falls back to a safe default.

use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::model::{ReservationResult, ReservationStatus};

pub type Document = Map<String, Value>;

pub const SESSION_FULL: &str = "sessionFull";
pub const RESERVATION_STATUS: &str = "reservationStatus";
pub const RESERVATION_RESULT: &str = "reservationResult";
pub const REQUEST_RESULT: &str = "requestResult";
pub const REQUEST_ID: &str = "requestId";
pub const TIMESTAMP: &str = "timestamp";

/// A field value read from a remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Known(T),
    Missing,
    /// Present but not one of the expected values; holds the raw JSON text.
    Malformed(String),
}

impl<T> Decoded<T> {
    pub fn known(self) -> Option<T> {
        match self {
            Decoded::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.known().unwrap_or(default)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Decoded::Malformed(_))
    }

    pub fn malformed_raw(&self) -> Option<&str> {
        match self {
            Decoded::Malformed(raw) => Some(raw),
            _ => None,
        }
    }
}

fn decode_enum<T: FromStr>(value: Option<&Value>) -> Decoded<T> {
    match value {
        None | Some(Value::Null) => Decoded::Missing,
        Some(Value::String(s)) => match s.parse() {
            Ok(v) => Decoded::Known(v),
            Err(_) => Decoded::Malformed(s.clone()),
        },
        Some(other) => Decoded::Malformed(other.to_string()),
    }
}

fn decode_bool(value: Option<&Value>) -> Decoded<bool> {
    match value {
        None | Some(Value::Null) => Decoded::Missing,
        Some(Value::Bool(b)) => Decoded::Known(*b),
        Some(other) => Decoded::Malformed(other.to_string()),
    }
}

/// Per-session seat document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatAvailabilityDoc {
    pub session_full: Decoded<bool>,
}

impl SeatAvailabilityDoc {
    pub fn from_document(doc: Option<&Document>) -> Self {
        Self {
            session_full: decode_bool(doc.and_then(|d| d.get(SESSION_FULL))),
        }
    }

    /// `!sessionFull`; when the flag is missing or malformed the answer is
    /// decided by `missing_means_full`.
    pub fn seats_available(&self, missing_means_full: bool) -> bool {
        match self.session_full {
            Decoded::Known(full) => !full,
            Decoded::Missing | Decoded::Malformed(_) => !missing_means_full,
        }
    }

    pub fn to_document(session_full: bool) -> Document {
        let mut doc = Document::new();
        doc.insert(SESSION_FULL.into(), Value::Bool(session_full));
        doc
    }
}

/// The result the server posted for the user's last request on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationOutcome {
    pub result: ReservationResult,
    pub request_id: Option<String>,
    /// Epoch milliseconds at which the server posted the result.
    pub timestamp: Option<i64>,
}

impl ReservationOutcome {
    pub fn new(result: ReservationResult) -> Self {
        Self {
            result,
            request_id: None,
            timestamp: None,
        }
    }
}

/// Per-user-per-session document carrying confirmed status and last result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSessionDoc {
    pub status: Decoded<ReservationStatus>,
    pub result: Decoded<ReservationResult>,
    pub request_id: Option<String>,
    pub result_timestamp: Option<i64>,
}

impl UserSessionDoc {
    pub fn from_document(doc: Option<&Document>) -> Self {
        let status = decode_enum(doc.and_then(|d| d.get(RESERVATION_STATUS)));
        let nested = doc
            .and_then(|d| d.get(RESERVATION_RESULT))
            .and_then(Value::as_object);

        Self {
            status,
            result: decode_enum(nested.and_then(|r| r.get(REQUEST_RESULT))),
            request_id: nested
                .and_then(|r| r.get(REQUEST_ID))
                .and_then(Value::as_str)
                .map(str::to_string),
            result_timestamp: nested.and_then(|r| r.get(TIMESTAMP)).and_then(Value::as_i64),
        }
    }

    /// Confirmed status; a missing or malformed field reads as `None`.
    pub fn status_or_none(&self) -> ReservationStatus {
        self.status.clone().unwrap_or(ReservationStatus::None)
    }

    pub fn outcome(&self) -> Option<ReservationOutcome> {
        let result = self.result.clone().known()?;
        Some(ReservationOutcome {
            result,
            request_id: self.request_id.clone(),
            timestamp: self.result_timestamp,
        })
    }

    /// Builds the document a server writes after processing a request.
    pub fn to_document(status: ReservationStatus, outcome: Option<&ReservationOutcome>) -> Document {
        let mut doc = Document::new();
        doc.insert(RESERVATION_STATUS.into(), json!(status.as_str()));

        if let Some(o) = outcome {
            let mut nested = Document::new();
            nested.insert(REQUEST_RESULT.into(), json!(o.result.as_str()));
            if let Some(id) = &o.request_id {
                nested.insert(REQUEST_ID.into(), json!(id));
            }
            if let Some(ts) = o.timestamp {
                nested.insert(TIMESTAMP.into(), json!(ts));
            }
            doc.insert(RESERVATION_RESULT.into(), Value::Object(nested));
        }

        doc
    }
}
