//! Per-account cooldown between scheduled runs

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Time left before an account may run again, or `None` when it may run now.
///
/// `last_sync_at` is when the account's cursor was last committed; an
/// account that never committed one is always eligible.
pub fn cooldown_remaining(
    last_sync_at: Option<DateTime<Utc>>,
    cooldown_secs: u64,
) -> Option<Duration> {
    let last = last_sync_at?;
    let elapsed = (Utc::now() - last).num_seconds().max(0) as u64;
    (elapsed < cooldown_secs).then(|| Duration::from_secs(cooldown_secs - elapsed))
}

/// Whether the account is out of its cooldown window
pub fn cooldown_elapsed(last_sync_at: Option<DateTime<Utc>>, cooldown_secs: u64) -> bool {
    cooldown_remaining(last_sync_at, cooldown_secs).is_none()
}
