//! Injectable wall clock, so output timestamps can be pinned in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between Jan 1 1904 (ISO BMFF epoch) and Jan 1 1970 (Unix epoch).
pub const ISOM_TIME_OFFSET: u64 = 2_082_844_800;

/// Source of the current time, in seconds since the Unix epoch.
pub trait Clock: Send {
    fn now_unix_seconds(&self) -> u64;
}

/// Clock backed by the system time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_unix_seconds(&self) -> u64 {
        self.0
    }
}
