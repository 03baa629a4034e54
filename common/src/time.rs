use chrono::Utc;

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_tracks_the_wall_clock() {
        let before = Utc::now().timestamp_millis();
        let now = now_ms();
        let after = Utc::now().timestamp_millis();
        assert!(before <= now && now <= after);
    }
}
