use chrono::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct ReservationConfig {
    /// How long before a session starts the server stops accepting requests
    /// for it.
    ///
    /// The client never enforces this itself; it is used to explain
    /// `*Cutoff` results and by callers that want to grey out actions early.
    pub cutoff_window: Duration,

    /// Deliver the result already present when a result listener attaches.
    ///
    /// Off by default: the first snapshot usually carries a historical
    /// result, and replaying it would look like a fresh outcome.
    pub sends_initial_reservation_result_state: bool,

    /// How a missing or malformed `sessionFull` flag is read.
    ///
    /// `true` treats the session as full (no seats), the pessimistic reading.
    pub missing_seat_doc_means_full: bool,

    /// Capacity of the tracker's broadcast channel of reservation events.
    /// Slow receivers that fall further behind observe a lag error.
    pub broadcast_capacity: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            cutoff_window: Duration::hours(1),
            sends_initial_reservation_result_state: false,
            missing_seat_doc_means_full: true,
            broadcast_capacity: 64,
        }
    }
}

impl ReservationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unparseable values keep the
    /// default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cutoff_minutes = parse_or(&lookup, "RESERVATION_CUTOFF_MINUTES", 60i64).max(0);
        let cutoff_window = Duration::try_minutes(cutoff_minutes).unwrap_or_else(|| {
            warn!(
                key = "RESERVATION_CUTOFF_MINUTES",
                minutes = cutoff_minutes,
                "cutoff window out of range; using default"
            );
            defaults.cutoff_window
        });

        Self {
            cutoff_window,
            sends_initial_reservation_result_state: parse_or(
                &lookup,
                "RESERVATION_SEND_INITIAL_RESULT",
                defaults.sends_initial_reservation_result_state,
            ),
            missing_seat_doc_means_full: parse_or(
                &lookup,
                "RESERVATION_MISSING_SEATS_FULL",
                defaults.missing_seat_doc_means_full,
            ),
            broadcast_capacity: parse_or(
                &lookup,
                "RESERVATION_EVENT_CAPACITY",
                defaults.broadcast_capacity,
            )
            .max(1),
        }
    }

    pub fn with_initial_result_state(mut self, enabled: bool) -> Self {
        self.sends_initial_reservation_result_state = enabled;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, raw = %raw, "unparseable config value; using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = ReservationConfig::from_lookup(|_| None);

        assert_eq!(cfg.cutoff_window, Duration::hours(1));
        assert!(!cfg.sends_initial_reservation_result_state);
        assert!(cfg.missing_seat_doc_means_full);
        assert_eq!(cfg.broadcast_capacity, 64);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let env = HashMap::from([
            ("RESERVATION_CUTOFF_MINUTES", "30"),
            ("RESERVATION_SEND_INITIAL_RESULT", "true"),
            ("RESERVATION_MISSING_SEATS_FULL", "nope"),
            ("RESERVATION_EVENT_CAPACITY", "0"),
        ]);
        let cfg = ReservationConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.cutoff_window, Duration::minutes(30));
        assert!(cfg.sends_initial_reservation_result_state);
        assert!(cfg.missing_seat_doc_means_full);
        assert_eq!(cfg.broadcast_capacity, 1);
    }

    #[test]
    fn out_of_range_cutoff_falls_back_to_default() {
        let env = HashMap::from([("RESERVATION_CUTOFF_MINUTES", "9223372036854775807")]);
        let cfg = ReservationConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.cutoff_window, Duration::hours(1));
    }
}
