//! Monotonic clock used for render anchors and pacing

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed on the monotonic clock since the process-wide epoch.
pub fn monotonic_now_ns() -> i64 {
    EPOCH.elapsed().as_nanos() as i64
}

/// Convert a presentation timestamp in microseconds to nanoseconds.
pub fn us_to_ns(us: i64) -> i64 {
    us.saturating_mul(1_000)
}
