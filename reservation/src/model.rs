use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier as used by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl From<String> for SessionId {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// Opaque identifier of the signed-in user; scopes every per-user store path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Zero-length and inverted intervals contain no instant.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Strict overlap: `s1 < e2 && s2 < e1`. Abutting intervals do not overlap
    /// and an empty interval overlaps nothing.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }

        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        if self.is_empty() {
            return Duration::zero();
        }
        self.end - self.start
    }
}

/// A conference session, reduced to what reservation logic needs.
/// Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub room_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<SessionId>,
        room_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            room_id: room_id.into(),
            start_time,
            end_time,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_time, self.end_time)
    }

    pub fn has_valid_interval(&self) -> bool {
        !self.interval().is_empty()
    }

    /// Instant after which the server rejects new requests for this session.
    pub fn reservation_cutoff(&self, window: Duration) -> DateTime<Utc> {
        self.start_time - window
    }

    /// Returns true once `now >= start_time - window`.
    pub fn is_past_cutoff(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now >= self.reservation_cutoff(window)
    }
}

/// Durable, server-confirmed reservation state of one session for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReservationStatus {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "RESERVED")]
    Reserved,
    #[serde(rename = "WAITLISTED")]
    Waitlisted,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::None => "NONE",
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Waitlisted => "WAITLISTED",
        }
    }

    /// Reserved or waitlisted: the user holds a claim that can clash.
    pub fn is_held(&self) -> bool {
        !matches!(self, ReservationStatus::None)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(ReservationStatus::None),
            "RESERVED" => Ok(ReservationStatus::Reserved),
            "WAITLISTED" => Ok(ReservationStatus::Waitlisted),
            other => Err(anyhow::anyhow!("Invalid ReservationStatus value: {}", other)),
        }
    }
}

/// The request family a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionFamily {
    Reserve,
    Cancel,
    Swap,
}

/// Outcome of a reservation request, reported once the server processed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationResult {
    #[serde(rename = "RESERVE_SUCCEEDED")]
    Reserved,
    #[serde(rename = "RESERVE_WAITLISTED")]
    Waitlisted,
    #[serde(rename = "CANCEL_SUCCEEDED")]
    Cancelled,
    #[serde(rename = "CANCEL_DENIED_CUTOFF")]
    CancelCutoff,
    #[serde(rename = "CANCEL_DENIED_UNKNOWN")]
    CancelUnknown,
    #[serde(rename = "RESERVE_DENIED_CLASH")]
    Clash,
    #[serde(rename = "RESERVE_DENIED_CUTOFF")]
    Cutoff,
    #[serde(rename = "SWAP_SUCCEEDED")]
    Swapped,
    #[serde(rename = "SWAP_DENIED_CLASH")]
    SwapClash,
    #[serde(rename = "SWAP_DENIED_CUTOFF")]
    SwapCutoff,
    #[serde(rename = "SWAP_WAITLISTED")]
    SwapWaitlisted,
    #[serde(rename = "SWAP_DENIED_UNKNOWN")]
    SwapUnknown,
    #[serde(rename = "RESERVE_DENIED_UNKNOWN")]
    Unknown,
}

impl ReservationResult {
    pub const ALL: [ReservationResult; 13] = [
        ReservationResult::Reserved,
        ReservationResult::Waitlisted,
        ReservationResult::Cancelled,
        ReservationResult::CancelCutoff,
        ReservationResult::CancelUnknown,
        ReservationResult::Clash,
        ReservationResult::Cutoff,
        ReservationResult::Swapped,
        ReservationResult::SwapClash,
        ReservationResult::SwapCutoff,
        ReservationResult::SwapWaitlisted,
        ReservationResult::SwapUnknown,
        ReservationResult::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationResult::Reserved => "RESERVE_SUCCEEDED",
            ReservationResult::Waitlisted => "RESERVE_WAITLISTED",
            ReservationResult::Cancelled => "CANCEL_SUCCEEDED",
            ReservationResult::CancelCutoff => "CANCEL_DENIED_CUTOFF",
            ReservationResult::CancelUnknown => "CANCEL_DENIED_UNKNOWN",
            ReservationResult::Clash => "RESERVE_DENIED_CLASH",
            ReservationResult::Cutoff => "RESERVE_DENIED_CUTOFF",
            ReservationResult::Swapped => "SWAP_SUCCEEDED",
            ReservationResult::SwapClash => "SWAP_DENIED_CLASH",
            ReservationResult::SwapCutoff => "SWAP_DENIED_CUTOFF",
            ReservationResult::SwapWaitlisted => "SWAP_WAITLISTED",
            ReservationResult::SwapUnknown => "SWAP_DENIED_UNKNOWN",
            ReservationResult::Unknown => "RESERVE_DENIED_UNKNOWN",
        }
    }

    pub fn family(&self) -> ActionFamily {
        match self {
            ReservationResult::Reserved
            | ReservationResult::Waitlisted
            | ReservationResult::Clash
            | ReservationResult::Cutoff
            | ReservationResult::Unknown => ActionFamily::Reserve,
            ReservationResult::Cancelled
            | ReservationResult::CancelCutoff
            | ReservationResult::CancelUnknown => ActionFamily::Cancel,
            ReservationResult::Swapped
            | ReservationResult::SwapClash
            | ReservationResult::SwapCutoff
            | ReservationResult::SwapWaitlisted
            | ReservationResult::SwapUnknown => ActionFamily::Swap,
        }
    }

    /// The request was applied (possibly onto a waitlist).
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReservationResult::Reserved
                | ReservationResult::Waitlisted
                | ReservationResult::Cancelled
                | ReservationResult::Swapped
                | ReservationResult::SwapWaitlisted
        )
    }

    /// A conflicting reservation was found server-side; re-run clash
    /// detection and offer a swap.
    pub fn is_clash(&self) -> bool {
        matches!(self, ReservationResult::Clash | ReservationResult::SwapClash)
    }

    pub fn is_cutoff(&self) -> bool {
        matches!(
            self,
            ReservationResult::Cutoff
                | ReservationResult::CancelCutoff
                | ReservationResult::SwapCutoff
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            ReservationResult::Unknown
                | ReservationResult::CancelUnknown
                | ReservationResult::SwapUnknown
        )
    }

    /// Every result ends its request; nothing here is retried automatically.
    pub fn is_terminal(&self) -> bool {
        true
    }

    /// Status of the requested session once the server applied a successful
    /// result. `None` for denials, which leave the status untouched.
    pub fn expected_status(&self) -> Option<ReservationStatus> {
        match self {
            ReservationResult::Reserved | ReservationResult::Swapped => {
                Some(ReservationStatus::Reserved)
            }
            ReservationResult::Waitlisted | ReservationResult::SwapWaitlisted => {
                Some(ReservationStatus::Waitlisted)
            }
            ReservationResult::Cancelled => Some(ReservationStatus::None),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReservationResult::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid ReservationResult value: {}", s))
    }
}

/// A session the user holds some reservation state on.
///
/// Identity is the session id alone: two values with the same id are equal
/// whatever their status or timestamp.
#[derive(Debug, Clone)]
pub struct ReservedSession {
    pub id: SessionId,
    pub status: ReservationStatus,
    /// Epoch milliseconds at which the server last set `status`.
    ///
    /// The user-session document has no status timestamp, so the tracker
    /// takes the timestamp of the result that set the status, and `0` when
    /// the document carries no result timestamp.
    pub timestamp: i64,
}

impl ReservedSession {
    pub fn new(id: impl Into<SessionId>, status: ReservationStatus, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            status,
            timestamp,
        }
    }
}

impl PartialEq for ReservedSession {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReservedSession {}

impl Hash for ReservedSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
