use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{KickSource, SessionStatus};

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} contains out-of-range value {value}"))
}

/// Fixed-width UTC timestamps so that text comparison orders them correctly.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_optional_datetime(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_status(value: &str) -> Result<SessionStatus> {
    SessionStatus::parse(value).ok_or_else(|| anyhow!("unknown session status {value}"))
}

pub fn parse_source(value: &str) -> Result<KickSource> {
    KickSource::parse(value).ok_or_else(|| anyhow!("unknown kick source {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_datetimes_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 5).unwrap();
        let later = earlier + chrono::Duration::milliseconds(500);
        assert!(format_datetime(&earlier) < format_datetime(&later));
        assert_eq!(format_datetime(&earlier), "2026-03-01T09:00:05.000000Z");
    }

    #[test]
    fn datetime_round_trips_through_text() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 5).unwrap()
            + chrono::Duration::microseconds(1234);
        assert_eq!(parse_datetime(&format_datetime(&at), "at").unwrap(), at);
    }

    #[test]
    fn rejects_unknown_enums_and_negative_counts() {
        assert!(parse_status("Running").is_err());
        assert!(parse_source("voice").is_err());
        assert!(to_u32(-1, "kick_count").is_err());
        assert_eq!(to_u32(7, "kick_count").unwrap(), 7);
    }
}
