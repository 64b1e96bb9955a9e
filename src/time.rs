use chrono::{DateTime, NaiveDate, Utc};

pub const DAY_MS: i64 = 86_400_000;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Midnight UTC of the given calendar day, in epoch milliseconds.
pub fn day_ms(year: i32, month: u32, day: u32) -> Option<i64> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// RFC 3339 rendering used in log fields and CLI output.
pub fn format_ms(ms: i64) -> String {
    to_date(ms).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
