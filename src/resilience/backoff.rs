//! Reopen delay calculation.

use std::time::Duration;

/// Delay before reopening after the `open_count`-th consecutive trip.
///
/// Grows linearly with `open_count` and is capped at `max_open`.
pub fn reopen_delay(min_open: Duration, max_open: Duration, open_count: u32) -> Duration {
    min_open.saturating_mul(open_count).min(max_open)
}
