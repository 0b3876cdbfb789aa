//! Timestamp helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// All request timers on the wire path compare against this clock; the
/// sentinel `-1` marks "never", so the clock must stay far from zero.
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
