use crate::model::{ReservationStatus, Session, SessionId};

/// What a "toggle reservation" action should request for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleAction {
    Reserve,
    Cancel,
    /// Reserve this session and cancel `cancel` in the same request.
    Swap { cancel: SessionId },
}

/// Decides the request for toggling a session, given its confirmed status
/// and the output of [`crate::ClashDetector::clashes`] for it.
///
/// A held reservation or waitlisting is cancelled. Otherwise the first
/// clash (in clash-detector order) is swapped out. With no clash it is a
/// plain reserve.
pub fn plan_toggle(current: ReservationStatus, clashes: &[Session]) -> ToggleAction {
    if current.is_held() {
        return ToggleAction::Cancel;
    }

    match clashes.first() {
        Some(conflict) => ToggleAction::Swap {
            cancel: conflict.id.clone(),
        },
        None => ToggleAction::Reserve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(id: &str) -> Session {
        let start = Utc.with_ymd_and_hms(2026, 5, 12, 10, 0, 0).unwrap();
        Session::new(id, "room", start, start + chrono::Duration::hours(1))
    }

    #[test]
    fn held_reservation_is_cancelled_even_with_clashes() {
        let clashes = vec![session("B")];
        assert_eq!(
            plan_toggle(ReservationStatus::Waitlisted, &clashes),
            ToggleAction::Cancel
        );
    }

    #[test]
    fn clash_turns_reserve_into_swap_with_first_conflict() {
        let clashes = vec![session("B"), session("C")];
        assert_eq!(
            plan_toggle(ReservationStatus::None, &clashes),
            ToggleAction::Swap {
                cancel: "B".into()
            }
        );
    }

    #[test]
    fn no_clash_is_plain_reserve() {
        assert_eq!(plan_toggle(ReservationStatus::None, &[]), ToggleAction::Reserve);
    }
}
