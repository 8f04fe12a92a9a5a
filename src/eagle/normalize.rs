use crate::prelude::*;
use chrono::{DateTime, Utc};

// Device clocks drift wildly after battery swaps; anything more than a year
// out would corrupt range queries, so it gets replaced with the server clock.
const MAX_DRIFT_SECS: i64 = 31_536_000;

/// Replaces an implausible device timestamp with `now`.
pub fn normalize(candidate: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let drift = (candidate - now).num_seconds().abs();
    if drift > MAX_DRIFT_SECS {
        warn!(
            "implausible device timestamp {} ({}s from now), using current time",
            candidate, drift
        );
        now
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn plausible_timestamp_passes_through() {
        let now = Utils::utc();
        let candidate = now - Duration::hours(2);
        assert_eq!(normalize(candidate, now), candidate);
    }

    #[test]
    fn normalizing_is_idempotent() {
        let now = Utils::utc();
        let once = normalize(now - Duration::days(3), now);
        assert_eq!(normalize(once, now), once);
    }

    #[test]
    fn one_year_minus_a_second_is_accepted() {
        let now = Utils::utc();
        let candidate = now - Duration::seconds(MAX_DRIFT_SECS - 1);
        assert_eq!(normalize(candidate, now), candidate);
    }

    #[test]
    fn exactly_one_year_is_accepted() {
        let now = Utils::utc();
        let candidate = now + Duration::seconds(MAX_DRIFT_SECS);
        assert_eq!(normalize(candidate, now), candidate);
    }

    #[test]
    fn one_year_plus_a_second_is_replaced() {
        let now = Utils::utc();
        assert_eq!(normalize(now + Duration::seconds(MAX_DRIFT_SECS + 1), now), now);
        assert_eq!(normalize(now - Duration::seconds(MAX_DRIFT_SECS + 1), now), now);
    }
}
