//! Repository functions — all storage access goes through this module.
//!
//! Functions take `&Connection` and map rows by index. Instants are stored
//! as RFC 3339 UTC text so lexicographic comparison in SQL matches
//! chronological order; calendar dates are stored as `YYYY-MM-DD`.

pub mod dose_log;
pub mod medication;
pub mod profile;

use chrono::{DateTime, Utc};

/// Format an instant for storage (RFC 3339, UTC, second precision).
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a stored instant. Returns `None` on malformed input.
pub fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
