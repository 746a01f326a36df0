use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};

/// Render a timestamp as UTC ISO-8601 with a `Z` suffix.
///
/// Fractional seconds are emitted only when non-zero, so whole-second
/// timestamps render as e.g. `2024-01-01T00:00:00Z`. This is the canonical
/// form used in sidecar keys and extended-retention object keys.
pub fn format_utc_iso_z(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Format a timestamp as a `YYYYMMDD` directory name.
pub fn format_date_dir(value: &DateTime<Utc>) -> String {
    value.format("%Y%m%d").to_string()
}

/// Parse an ISO-8601 timestamp into UTC.
///
/// Accepts `Z` or numeric offsets, and treats bare datetimes (and bare
/// dates) as already being UTC.
pub fn parse_iso_utc(value: &str) -> Result<DateTime<Utc>> {
    let raw = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    bail!("invalid ISO-8601 timestamp: {raw:?}")
}

/// Clamp a timestamp down to midnight UTC of the same day.
pub fn floor_to_midnight(value: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&value.date_naive().and_time(NaiveTime::MIN))
}
