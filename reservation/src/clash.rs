use std::collections::HashMap;

use tracing::{debug, trace};

use crate::model::{ReservedSession, Session, SessionId};

/// Finds the user's reservations that overlap a candidate session in time.
///
/// Works on a read-only snapshot of the session list and the user's
/// reservations taken at construction. If reservations change, build a new
/// detector; results are never cached.
pub struct ClashDetector<'a> {
    sessions: HashMap<&'a SessionId, &'a Session>,
    reservations: &'a [ReservedSession],
}

impl<'a> ClashDetector<'a> {
    pub fn new(sessions: &'a [Session], reservations: &'a [ReservedSession]) -> Self {
        Self {
            sessions: sessions.iter().map(|s| (&s.id, s)).collect(),
            reservations,
        }
    }

    /// Sessions the user reserved or waitlisted that overlap `candidate`.
    ///
    /// Order follows the reservation list. Reservations with status
    /// `None`, reservations whose session is unknown, and the candidate's
    /// own reservation are skipped.
    pub fn clashes(&self, candidate: &Session) -> Vec<Session> {
        if !candidate.has_valid_interval() {
            debug!(session_id = %candidate.id, "candidate has an empty interval; nothing can clash");
            return Vec::new();
        }
        let interval = candidate.interval();

        self.reservations
            .iter()
            .filter(|r| r.status.is_held())
            .filter(|r| r.id != candidate.id)
            .filter_map(|r| match self.sessions.get(&r.id) {
                Some(s) => Some(*s),
                None => {
                    trace!(session_id = %r.id, "reservation refers to an unknown session; dropped");
                    None
                }
            })
            .filter(|s| s.interval().overlaps(&interval))
            .cloned()
            .collect()
    }

    pub fn has_clash(&self, candidate: &Session) -> bool {
        !self.clashes(candidate).is_empty()
    }
}
