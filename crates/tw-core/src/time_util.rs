//! Wall-clock timestamps used for tick and order stamping.
//!
//! Ticks are stamped by the producing process and compared by consumers in
//! other processes, so only the realtime clock is meaningful here.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Microseconds elapsed since `since_us`, clamped at zero when clocks disagree.
#[inline]
pub fn age_us(since_us: u64) -> u64 {
    now_us().saturating_sub(since_us)
}
