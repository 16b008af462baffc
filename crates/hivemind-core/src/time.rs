//! Wall-clock time as the unix epoch seconds used throughout sig_ts / cooldown arithmetic.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds. Centralized so request handlers and tests can agree on what
/// "now" means without each reaching for `SystemTime` directly.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}
