//! Timestamp and duration formatting for the Application Insights wire schema.
//!
//! Envelope timestamps use microsecond precision (`YYYY-MM-DDTHH:MM:SS.ffffffZ`);
//! durations use the `D.HH:MM:SS.fff` format the ingestion service expects.

use chrono::{DateTime, Utc};

/// Format a UNIX-nanosecond timestamp as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn format_timestamp_micros(unix_nanos: i64) -> String {
    let dt = nanos_to_datetime(unix_nanos);
    // `%.6f` gives six fractional digits (microseconds), matching the
    // worked examples in the upstream test fixtures.
    format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S%.6f"))
}

fn nanos_to_datetime(unix_nanos: i64) -> DateTime<Utc> {
    let secs = unix_nanos.div_euclid(1_000_000_000);
    let nanos = unix_nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}

/// Format a nanosecond duration as `D.HH:MM:SS.fff`.
pub fn format_duration_nanos(duration_nanos: i64) -> String {
    let duration_nanos = duration_nanos.max(0);
    let total_millis = duration_nanos / 1_000_000;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let total_hours = total_mins / 60;
    let hours = total_hours % 24;
    let days = total_hours / 24;
    format!("{days}.{hours:02}:{mins:02}:{secs:02}.{millis:03}")
}
