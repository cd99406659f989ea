//! Wall-clock adapter.
//!
//! Breaker deadlines, quota reset times and webhook timestamps are all epoch
//! milliseconds read from [`SystemClock`] in production. Tests swap in
//! `MockClock` from `crate::infrastructure::mocks`.

use crate::application::ports::Clock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Reads `SystemTime::now()` as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        // A clock set before 1970 reads as the epoch rather than panicking.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().try_into().unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
