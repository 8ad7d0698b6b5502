//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as zero rather than panicking.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Whole seconds elapsed between two millisecond timestamps, saturating at zero.
pub fn elapsed_secs(start_ms: u128, end_ms: u128) -> u64 {
    u64::try_from(end_ms.saturating_sub(start_ms) / 1000).unwrap_or(u64::MAX)
}
