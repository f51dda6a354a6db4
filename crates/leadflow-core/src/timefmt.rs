//! Timestamp codec for the store.
//!
//! All timestamps are persisted as UTC text in a single fixed-width layout,
//! so lexicographic order in SQL equals chronological order.

use crate::error::LeadflowError;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Storage layout: `2024-01-01 04:00:00`.
pub const DB_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp for storage (second precision).
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(DB_FORMAT).to_string()
}

/// Parse a stored or user-supplied timestamp.
///
/// Accepts the storage layout, the `T`-separated variant with or without a
/// trailing `Z`, and full RFC 3339 with an offset.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, LeadflowError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    let normalized = trimmed.trim_end_matches('Z').replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&normalized, DB_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M"))
        .map(|naive| naive.and_utc())
        .map_err(|e| LeadflowError::Store(format!("invalid timestamp '{raw}': {e}")))
}

/// Parse an optional stored timestamp column.
pub fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, LeadflowError> {
    raw.map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap();
        assert_eq!(format_ts(ts), "2024-01-01 04:00:00");
    }

    #[test]
    fn test_parse_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_ts("2024-02-01 10:00:00").unwrap(), expected);
        assert_eq!(parse_ts("2024-02-01T10:00:00").unwrap(), expected);
        assert_eq!(parse_ts("2024-02-01T10:00:00Z").unwrap(), expected);
        assert_eq!(parse_ts("2024-02-01T12:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_ts("2024-02-01T10:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_ts("tomorrow").is_err());
        assert!(parse_ts("").is_err());
    }

    #[test]
    fn test_parse_opt() {
        assert!(parse_opt_ts(None).unwrap().is_none());
        assert!(parse_opt_ts(Some("2024-01-01 00:00:00")).unwrap().is_some());
    }
}
