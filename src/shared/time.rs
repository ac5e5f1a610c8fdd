//! Timestamp unit handling.
//!
//! Upstream candles do not declare their unit. A value above
//! [`MILLIS_THRESHOLD`] (11 digits) is read as milliseconds, anything else as
//! seconds. The cut-over sits around the year 2286 in seconds, so second
//! timestamps never cross it in practice.

/// Timestamps strictly above this value are milliseconds.
pub const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Normalize a seconds-or-milliseconds timestamp to seconds.
pub fn to_seconds(time: i64) -> i64 {
    if time > MILLIS_THRESHOLD {
        time / 1000
    } else {
        time
    }
}

/// Widget windows arrive in seconds; the backend wants milliseconds.
pub fn seconds_to_millis(seconds: i64) -> i64 {
    seconds.saturating_mul(1000)
}
