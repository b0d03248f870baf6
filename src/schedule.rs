//! Next-run computation for each scheduling discipline.
//!
//! Pure over an explicit base instant: the engine drives these from its
//! injected clock, and tests pin wall time exactly.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

/// Parse an interval string of the form `<n><unit>` with a unit of `s`, `m`,
/// `h`, or `d`. Zero and negative lengths are rejected.
pub fn parse_interval(input: &str) -> Option<Duration> {
    let trimmed = input.trim();
    if trimmed.len() < 2 {
        return None;
    }
    let (value, unit) = trimmed.split_at(trimmed.len() - 1);
    let n: i64 = value.parse().ok()?;
    if n <= 0 {
        return None;
    }
    match unit {
        "s" => Some(Duration::seconds(n)),
        "m" => Some(Duration::minutes(n)),
        "h" => Some(Duration::hours(n)),
        "d" => Some(Duration::days(n)),
        _ => None,
    }
}

/// Next firing instant for an interval task. The candidate is one interval
/// past the last run (or past `base` when the task has never run); a
/// candidate that has already passed snaps to `base + interval` so a
/// long-idle task fires once from now instead of draining every missed slot.
pub fn next_interval_run(
    interval: Duration,
    last_run_at: Option<DateTime<Utc>>,
    base: DateTime<Utc>,
) -> DateTime<Utc> {
    let candidate = match last_run_at {
        Some(last) => last + interval,
        None => base + interval,
    };
    if candidate < base {
        base + interval
    } else {
        candidate
    }
}

/// Parse the comma-separated `"HH:MM"` list, dropping elements that do not
/// parse. Returns the valid clock points in input order.
pub fn parse_daily_points(daily_time: &str) -> Vec<NaiveTime> {
    daily_time
        .split(',')
        .filter_map(|part| NaiveTime::parse_from_str(part.trim(), "%H:%M").ok())
        .collect()
}

/// Earliest upcoming instant among the configured clock points, evaluated in
/// the zone of `base`. A point not strictly after `base` rolls to tomorrow.
/// Returns `None` when no element of the list parses.
pub fn next_daily_run<Tz: TimeZone>(
    daily_time: &str,
    base: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let tz = base.timezone();
    let mut earliest: Option<DateTime<Tz>> = None;
    for point in parse_daily_points(daily_time) {
        let today = tz
            .from_local_datetime(&base.date_naive().and_time(point))
            .earliest();
        let candidate = match today {
            Some(instant) if instant > *base => instant,
            // Already passed today, or the local time does not exist (DST gap).
            _ => {
                let tomorrow = base.date_naive() + Duration::days(1);
                match tz.from_local_datetime(&tomorrow.and_time(point)).earliest() {
                    Some(instant) => instant,
                    None => continue,
                }
            }
        };
        let replace = earliest
            .as_ref()
            .map(|current| candidate < *current)
            .unwrap_or(true);
        if replace {
            earliest = Some(candidate);
        }
    }
    earliest
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parse_interval_accepts_the_supported_units() {
        assert_eq!(parse_interval("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_interval("1h"), Some(Duration::hours(1)));
        assert_eq!(parse_interval("1d"), Some(Duration::days(1)));
        assert_eq!(parse_interval("45s"), Some(Duration::seconds(45)));
        assert_eq!(parse_interval("  2h "), Some(Duration::hours(2)));
    }

    #[test]
    fn parse_interval_rejects_malformed_input() {
        for bad in ["", "m", "0m", "-5m", "5x", "5", "1.5h", "one hour"] {
            assert_eq!(parse_interval(bad), None, "accepted `{bad}`");
        }
    }

    #[test]
    fn interval_first_run_is_one_interval_from_base() {
        // Never-run task created at 10:00 with a 15m interval.
        let base = utc(2025, 1, 1, 10, 0, 0);
        let next = next_interval_run(Duration::minutes(15), None, base);
        assert_eq!(next, utc(2025, 1, 1, 10, 15, 0));
    }

    #[test]
    fn interval_catch_up_fires_from_now_forward() {
        // Last ran at 08:00, clock is 12:00: the stale 08:15 candidate snaps
        // to 12:15 rather than replaying four hours of missed slots.
        let base = utc(2025, 1, 1, 12, 0, 0);
        let last = Some(utc(2025, 1, 1, 8, 0, 0));
        let next = next_interval_run(Duration::minutes(15), last, base);
        assert_eq!(next, utc(2025, 1, 1, 12, 15, 0));
        assert!(next > base);
    }

    #[test]
    fn interval_recent_run_keeps_the_natural_candidate() {
        let base = utc(2025, 1, 1, 12, 0, 0);
        let last = Some(utc(2025, 1, 1, 11, 50, 0));
        let next = next_interval_run(Duration::minutes(15), last, base);
        assert_eq!(next, utc(2025, 1, 1, 12, 5, 0));
    }

    #[test]
    fn daily_points_parse_leniently() {
        assert_eq!(parse_daily_points("09:00,18:00").len(), 2);
        assert_eq!(parse_daily_points(" 09:00 , 18:00 ").len(), 2);
        assert_eq!(parse_daily_points("bogus,18:00").len(), 1);
        assert!(parse_daily_points("").is_empty());
        assert!(parse_daily_points("25:99").is_empty());
    }

    #[test]
    fn daily_picks_the_earliest_point_after_base() {
        let base = utc(2025, 1, 1, 10, 0, 0);
        let next = next_daily_run("09:00,12:30,18:00", &base).unwrap();
        assert_eq!(next, utc(2025, 1, 1, 12, 30, 0));
    }

    #[test]
    fn daily_point_equal_to_base_rolls_forward() {
        // "not strictly after" means an exact match schedules the next point.
        let base = utc(2025, 1, 1, 12, 30, 0);
        let next = next_daily_run("09:00,12:30,18:00", &base).unwrap();
        assert_eq!(next, utc(2025, 1, 1, 18, 0, 0));
    }

    #[test]
    fn daily_wraps_to_tomorrow_when_all_points_have_passed() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let base = tokyo.with_ymd_and_hms(2025, 1, 1, 19, 30, 0).unwrap();
        let next = next_daily_run("09:00,18:00", &base).unwrap();
        assert_eq!(next, tokyo.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn daily_with_no_valid_point_is_none() {
        let base = utc(2025, 1, 1, 10, 0, 0);
        assert!(next_daily_run("", &base).is_none());
        assert!(next_daily_run("soon", &base).is_none());
        assert!(next_daily_run(",,", &base).is_none());
    }
}
