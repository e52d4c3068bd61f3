//! Unix timestamp helpers shared by the stores and token code.

use chrono::{DateTime, NaiveDate, Utc};

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Render a Unix timestamp as RFC 3339 for API responses.
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

/// UTC calendar day of a Unix timestamp.
pub fn utc_day(timestamp: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        // 2024-01-15 12:30:45 UTC
        assert_eq!(format_timestamp(1705321845), "2024-01-15T12:30:45+00:00");
    }

    #[test]
    fn test_utc_day_rolls_over_at_midnight() {
        let before = 1705363199; // 2024-01-15 23:59:59
        assert_eq!(utc_day(before).to_string(), "2024-01-15");
        assert_eq!(utc_day(before + 1).to_string(), "2024-01-16");
    }
}
