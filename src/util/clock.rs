//! Wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Absolute expiry timestamp for a record written at `now_ms` with `ttl`.
pub fn expiry_ms(now_ms: u128, ttl: Duration) -> u128 {
    now_ms.saturating_add(ttl.as_millis())
}
