//! Observation timestamp normalization

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse an RFC 3339 timestamp into UTC; missing or unparseable input yields `now`.
pub fn normalize_observed_at(value: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Canonical form: millisecond precision, `Z` suffix.
pub fn canonical_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
