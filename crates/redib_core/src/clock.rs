//! Epoch-millisecond time helpers shared by services and sweeps.
//!
//! All persisted timestamps are Unix epoch milliseconds. Workflow entry points
//! take `now_ms` explicitly so periodic sweeps and tests stay deterministic.

use chrono::{DateTime, NaiveDate, Utc};

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Converts a day count into milliseconds.
pub fn days(count: u32) -> i64 {
    i64::from(count) * DAY_MS
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// UTC calendar date `YYYY-MM-DD` of an epoch-millisecond instant.
///
/// Instants outside chrono's range render as an empty string.
pub fn format_date(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|instant| instant.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Parses a `YYYY-MM-DD` calendar date; impossible dates yield `None`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::{days, format_date, now_epoch_ms, parse_date, DAY_MS};
    use chrono::Datelike;

    #[test]
    fn format_date_uses_utc_calendar() {
        assert_eq!(format_date(0), "1970-01-01");
        assert_eq!(format_date(1_709_164_800_000), "2024-02-29");
        assert_eq!(format_date(1_735_689_599_999), "2024-12-31");
        assert_eq!(format_date(-DAY_MS), "1969-12-31");
    }

    #[test]
    fn parse_date_rejects_impossible_days() {
        assert_eq!(parse_date(" 2024-02-29 ").map(|date| date.year()), Some(2024));
        assert!(parse_date("2023-02-29").is_none());
        assert!(parse_date("2024-13-45").is_none());
        assert!(parse_date("15/03/2024").is_none());
    }

    #[test]
    fn days_scales_by_day_length() {
        assert_eq!(days(0), 0);
        assert_eq!(days(10), 10 * DAY_MS);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_epoch_ms() > 1_577_836_800_000);
    }
}
