use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, clamped into `u64`.
///
/// Times before the epoch collapse to zero.
pub fn unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

