//! Timestamp parsing and formatting for the source exports.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::constants::OUTPUT_TIMESTAMP_FORMAT;

/// Timestamps are carried as naive wall-clock times; the exports do not
/// record a zone and both tables share one.
pub type Timestamp = NaiveDateTime;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a timestamp from any of the representations seen in the exports:
/// `YYYY-MM-DD HH:MM:SS[.f]`, ISO `T`-separated, RFC 3339 with offset
/// (converted to UTC), a bare date (midnight), or integer epoch seconds.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    None
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(OUTPUT_TIMESTAMP_FORMAT).to_string()
}

/// Signed elapsed hours from `from` to `to`.
pub fn hours_between(from: &Timestamp, to: &Timestamp) -> f64 {
    (*to - *from).num_milliseconds() as f64 / 3_600_000.0
}
