//! Wall-clock timestamps in nanoseconds, as the wire protocol expects.

use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch, per the local wall clock.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is set before the Unix epoch")
        .as_nanos() as i64
}
