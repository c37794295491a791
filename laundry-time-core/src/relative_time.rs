//! "How long ago" phrases for status timestamps.

use chrono::{DateTime, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

const UNITS: [(i64, &str); 7] = [
    (YEAR, "year"),
    (MONTH, "month"),
    (WEEK, "week"),
    (DAY, "day"),
    (HOUR, "hour"),
    (MINUTE, "minute"),
    (1, "second"),
];

/// Formats `timestamp` relative to the current time, e.g. "5 minutes ago".
pub fn format_relative_time(timestamp: DateTime<Utc>) -> String {
    format_relative_time_from(timestamp, Utc::now())
}

/// Formats `timestamp` relative to `now`.
///
/// Uses the largest unit with a non-zero whole count. Past timestamps read
/// "N units ago", future ones "in N units".
pub fn format_relative_time_from(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(timestamp).num_seconds();
    let seconds = delta.abs();

    let (count, unit) = UNITS
        .iter()
        .find(|(size, _)| seconds >= *size)
        .map(|(size, name)| (seconds / size, *name))
        .unwrap_or((0, "second"));

    let phrase = if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    };

    if delta < 0 {
        format!("in {}", phrase)
    } else {
        format!("{} ago", phrase)
    }
}
