//! Wall-clock helpers.

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
