//! Human-readable rendering of lease durations and expiry timestamps

use chrono::{DateTime, Utc};

/// Format a number of seconds as `H:MM:SS`.
///
/// Hours are not padded and may exceed 24; minutes and seconds always use
/// two digits.
pub fn format_ttl(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, secs)
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` (UTC, no fractional part)
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}
