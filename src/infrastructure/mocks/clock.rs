//! Manually driven clock.

use crate::application::ports::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Epoch-millisecond clock that only moves when told to.
///
/// Reset timeouts, counter expiry and bucket boundaries can be crossed
/// instantly instead of sleeping through them.
///
/// # Examples
///
/// ```
/// use outbound_shield::infrastructure::mocks::MockClock;
/// use outbound_shield::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_000);
///
/// // Time starts at the specified epoch millisecond
/// assert_eq!(clock.now_millis(), 1_000);
///
/// // Advance time explicitly
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now_millis(), 11_000);
///
/// // Or set to a specific instant
/// clock.set(50_000);
/// assert_eq!(clock.now_millis(), 50_000);
/// ```
///
/// Clones share one atomic timestamp: hand a clone to the store and the
/// limiter, keep another in the test, and advancing it moves all of them.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_millis: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a mock clock starting at `start_millis` since the epoch.
    pub fn new(start_millis: u64) -> Self {
        Self {
            current_millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.current_millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to a specific epoch millisecond.
    pub fn set(&self, millis: u64) {
        self.current_millis.store(millis, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(1_704_067_200_000)
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> u64 {
        self.current_millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_mock_clock() {
        let clock = MockClock::new(0);
        assert_eq!(clock.now_millis(), 0);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 250);

        clock.set(10_000);
        assert_eq!(clock.now_millis(), 10_000);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = MockClock::new(0);
        let clone = clock.clone();

        let handle = thread::spawn(move || {
            clone.advance(Duration::from_secs(5));
        });
        handle.join().unwrap();

        assert_eq!(clock.now_millis(), 5_000);
    }
}
