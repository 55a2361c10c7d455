//! Shared helpers: CID computation, URL normalization, timestamps.

pub mod cid;
pub mod uri;

use chrono::{DateTime, SecondsFormat, Utc};

/// The current time truncated to microsecond precision.
///
/// Message timestamps carry microsecond precision on the wire; truncating at
/// creation keeps descriptor CIDs and index strings consistent.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Format a date as an RFC 3339 string with microsecond precision, as used
/// for index values and range filters.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}
