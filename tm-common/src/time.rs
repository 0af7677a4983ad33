//! Timestamp utilities

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Every calendar date from `from` to `to`, both inclusive.
///
/// Returns an empty list when `to` is before `from`.
pub fn date_range(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut day = from;
    while day <= to {
        dates.push(day);
        day += Duration::days(1);
    }
    dates
}

/// `days` dates ending today (inclusive), oldest first
pub fn trailing_days(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    if days == 0 {
        return Vec::new();
    }
    date_range(today - Duration::days(days as i64 - 1), today)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 1_600_000_000);
        assert!(timestamp.timestamp() < 4_102_444_800);
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(1000), std::time::Duration::from_secs(1));
        assert_eq!(millis_to_duration(0).as_millis(), 0);
    }

    #[test]
    fn test_date_range_inclusive() {
        let days = date_range(d(2024, 2, 27), d(2024, 3, 1));
        assert_eq!(days, vec![d(2024, 2, 27), d(2024, 2, 28), d(2024, 2, 29), d(2024, 3, 1)]);
    }

    #[test]
    fn test_date_range_reversed_is_empty() {
        assert!(date_range(d(2024, 3, 2), d(2024, 3, 1)).is_empty());
    }

    #[test]
    fn test_trailing_days() {
        let days = trailing_days(d(2024, 1, 2), 3);
        assert_eq!(days, vec![d(2023, 12, 31), d(2024, 1, 1), d(2024, 1, 2)]);
        assert!(trailing_days(d(2024, 1, 2), 0).is_empty());
    }
}
