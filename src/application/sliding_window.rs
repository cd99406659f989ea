//! Sliding window rate limiting.
//!
//! Two precisions share one limiter type:
//!
//! - **Bucketed**: time is cut into buckets of `window_size_ms` and each
//!   `(key, bucket)` pair owns one counter. One increment per call, but a burst
//!   straddling a bucket boundary can admit up to twice `max_requests` within
//!   one window length.
//! - **Log**: every admitted request leaves a timestamp; the window is the
//!   set of timestamps newer than `now - window_size_ms`. Exact, but stores
//!   one entry per request and checks then appends in two store round trips,
//!   so concurrent processes may overshoot by the number of racing calls.

use crate::application::limiter::{duration_ms, Limiter};
use crate::application::ports::{Clock, CounterStore};
use crate::domain::quota::{ceil_secs, RateLimitResult, SlidingWindowConfig, WindowPrecision};
use crate::error::{ConfigError, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default key prefix of the sliding window limiter.
pub const DEFAULT_PREFIX: &str = "sliding_limit";

/// Extra lifetime of bucket counters past the window itself.
const BUCKET_GRACE: Duration = Duration::from_secs(1);

/// Sliding window limiter over a shared counter store.
#[derive(Debug, Clone)]
pub struct SlidingWindowRateLimiter<S> {
    store: S,
    config: SlidingWindowConfig,
    clock: Arc<dyn Clock>,
    prefix: String,
    fail_open: bool,
}

impl<S: CounterStore> SlidingWindowRateLimiter<S> {
    /// Create a limiter over `store`.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(
        store: S,
        config: SlidingWindowConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
            prefix: DEFAULT_PREFIX.to_string(),
            fail_open: false,
        })
    }

    /// Namespace store keys under `prefix` instead of the default.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Allow operations through when the store is unreachable.
    pub fn fail_open(mut self, enabled: bool) -> Self {
        self.fail_open = enabled;
        self
    }

    /// Window settings in effect.
    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    fn bucket_key(&self, key: &str, bucket: u64) -> String {
        format!("{}:{}:window:{}", self.prefix, key, bucket)
    }

    fn log_key(&self, key: &str) -> String {
        format!("{}:{}:log", self.prefix, key)
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_size_ms)
    }

    fn remaining(&self, used: i64) -> u32 {
        u32::try_from(i64::from(self.config.max_requests) - used).unwrap_or(0)
    }

    fn bucket_rejection(&self, now: u64) -> RateLimitResult {
        let reset_at = self.config.next_bucket_start(now);
        RateLimitResult::rejected(ceil_secs(reset_at - now), reset_at)
    }

    async fn consume_bucketed(&self, key: &str, now: u64) -> Result<RateLimitResult, StoreError> {
        let bucket_key = self.bucket_key(key, self.config.bucket_id(now));
        self.store
            .set_if_absent(&bucket_key, 0, self.window() + BUCKET_GRACE)
            .await?;
        // Increment first so concurrent callers never both see the last slot free.
        let count = self.store.incr(&bucket_key).await?;

        if count > i64::from(self.config.max_requests) {
            tracing::debug!(key = %key, count, "Sliding window bucket exhausted");
            return Ok(self.bucket_rejection(now));
        }
        Ok(RateLimitResult::allowed(
            self.remaining(count),
            self.config.next_bucket_start(now),
        ))
    }

    async fn status_bucketed(&self, key: &str, now: u64) -> Result<RateLimitResult, StoreError> {
        let bucket_key = self.bucket_key(key, self.config.bucket_id(now));
        let count = self.store.get(&bucket_key).await?.unwrap_or(0);

        if count >= i64::from(self.config.max_requests) {
            return Ok(self.bucket_rejection(now));
        }
        Ok(RateLimitResult::allowed(
            self.remaining(count),
            self.config.next_bucket_start(now),
        ))
    }

    /// Prune the log and return the entries still inside the window.
    async fn live_log(&self, log_key: &str, now: u64) -> Result<(i64, Option<u64>), StoreError> {
        let cutoff = now.saturating_sub(self.config.window_size_ms);
        self.store.log_prune(log_key, cutoff).await?;
        let len = self.store.log_len(log_key).await?;
        let oldest = self.store.log_oldest(log_key).await?;
        Ok((i64::try_from(len).unwrap_or(i64::MAX), oldest))
    }

    fn log_rejection(&self, now: u64, oldest: Option<u64>) -> RateLimitResult {
        let reset_at = oldest
            .unwrap_or(now)
            .saturating_add(self.config.window_size_ms);
        RateLimitResult::rejected(ceil_secs(reset_at.saturating_sub(now)), reset_at)
    }

    async fn consume_log(&self, key: &str, now: u64) -> Result<RateLimitResult, StoreError> {
        let log_key = self.log_key(key);
        let (used, oldest) = self.live_log(&log_key, now).await?;

        if used >= i64::from(self.config.max_requests) {
            tracing::debug!(key = %key, used, "Sliding window log full");
            return Ok(self.log_rejection(now, oldest));
        }

        self.store.log_push(&log_key, now, self.window()).await?;
        let reset_at = oldest
            .unwrap_or(now)
            .saturating_add(self.config.window_size_ms);
        Ok(RateLimitResult::allowed(self.remaining(used + 1), reset_at))
    }

    async fn status_log(&self, key: &str, now: u64) -> Result<RateLimitResult, StoreError> {
        let (used, oldest) = self.live_log(&self.log_key(key), now).await?;

        if used >= i64::from(self.config.max_requests) {
            return Ok(self.log_rejection(now, oldest));
        }
        let reset_at = oldest
            .unwrap_or(now)
            .saturating_add(self.config.window_size_ms);
        Ok(RateLimitResult::allowed(self.remaining(used), reset_at))
    }

    async fn try_consume(&self, key: &str) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_millis();
        match self.config.precision {
            WindowPrecision::Bucketed => self.consume_bucketed(key, now).await,
            WindowPrecision::Log => self.consume_log(key, now).await,
        }
    }

    async fn try_status(&self, key: &str) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_millis();
        match self.config.precision {
            WindowPrecision::Bucketed => self.status_bucketed(key, now).await,
            WindowPrecision::Log => self.status_log(key, now).await,
        }
    }

    fn open_result(&self, key: &str, err: &StoreError) -> RateLimitResult {
        tracing::warn!(key = %key, error = %err, "Counter store unavailable, allowing operation");
        let now = self.clock.now_millis();
        RateLimitResult::allowed(
            self.config.max_requests,
            now.saturating_add(duration_ms(self.window())),
        )
    }
}

#[async_trait]
impl<S: CounterStore> Limiter for SlidingWindowRateLimiter<S> {
    async fn consume(&self, key: &str) -> Result<RateLimitResult, StoreError> {
        match self.try_consume(key).await {
            Err(err) if self.fail_open => Ok(self.open_result(key, &err)),
            result => result,
        }
    }

    async fn get_status(&self, key: &str) -> Result<RateLimitResult, StoreError> {
        match self.try_status(key).await {
            Err(err) if self.fail_open => Ok(self.open_result(key, &err)),
            result => result,
        }
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let bucket = self.config.bucket_id(self.clock.now_millis());
        let mut keys = vec![self.bucket_key(key, bucket), self.log_key(key)];
        if let Some(previous) = bucket.checked_sub(1) {
            // Still alive during its grace period.
            keys.push(self.bucket_key(key, previous));
        }
        self.store.delete(&keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::InMemoryStore;
    use crate::infrastructure::mocks::MockClock;

    fn limiter(
        window_size_ms: u64,
        max_requests: u32,
        precision: WindowPrecision,
        start: u64,
    ) -> (SlidingWindowRateLimiter<InMemoryStore>, MockClock, InMemoryStore) {
        let clock = MockClock::new(start);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = InMemoryStore::new(shared.clone());
        let config = SlidingWindowConfig::new(window_size_ms, max_requests)
            .unwrap()
            .with_precision(precision);
        let limiter = SlidingWindowRateLimiter::new(store.clone(), config, shared).unwrap();
        (limiter, clock, store)
    }

    #[tokio::test]
    async fn test_bucket_rejects_third_call() {
        let (limiter, _, _) = limiter(1_000, 2, WindowPrecision::Bucketed, 10_250);

        let first = limiter.consume("k").await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset_at, 11_000);
        assert!(limiter.consume("k").await.unwrap().allowed);

        let third = limiter.consume("k").await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.reset_at, 11_000);
        assert_eq!(third.retry_after, Some(1));
    }

    #[tokio::test]
    async fn test_next_bucket_starts_fresh() {
        let (limiter, clock, _) = limiter(1_000, 1, WindowPrecision::Bucketed, 10_900);
        assert!(limiter.consume("k").await.unwrap().allowed);
        assert!(!limiter.consume("k").await.unwrap().allowed);

        clock.set(11_000);
        assert!(limiter.consume("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_boundary_burst_admits_twice_the_rate() {
        // The documented cost of bucketing: 2 * max_requests within 200ms.
        let (limiter, clock, _) = limiter(1_000, 3, WindowPrecision::Bucketed, 10_900);
        for _ in 0..3 {
            assert!(limiter.consume("k").await.unwrap().allowed);
        }
        clock.set(11_100);
        for _ in 0..3 {
            assert!(limiter.consume("k").await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn test_bucket_key_layout_and_ttl() {
        let (limiter, _, store) = limiter(1_000, 5, WindowPrecision::Bucketed, 42_500);
        limiter.consume("user").await.unwrap();
        assert_eq!(
            store.get("sliding_limit:user:window:42").await.unwrap(),
            Some(1)
        );
        assert_eq!(
            store.ttl("sliding_limit:user:window:42").await.unwrap(),
            Some(Duration::from_millis(2_000))
        );
    }

    #[tokio::test]
    async fn test_log_is_exact_across_boundary() {
        let (limiter, clock, _) = limiter(1_000, 3, WindowPrecision::Log, 10_900);
        for _ in 0..3 {
            assert!(limiter.consume("k").await.unwrap().allowed);
        }
        clock.set(11_100);
        let rejected = limiter.consume("k").await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_at, 11_900);
        assert_eq!(rejected.retry_after, Some(1));

        clock.set(11_901);
        let result = limiter.consume("k").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);
    }

    #[tokio::test]
    async fn test_log_remaining_counts_down() {
        let (limiter, clock, _) = limiter(10_000, 3, WindowPrecision::Log, 0);
        assert_eq!(limiter.consume("k").await.unwrap().remaining, 2);
        clock.advance(Duration::from_millis(100));
        let second = limiter.consume("k").await.unwrap();
        assert_eq!(second.remaining, 1);
        assert_eq!(second.reset_at, 10_000);
    }

    #[tokio::test]
    async fn test_status_does_not_count() {
        for precision in [WindowPrecision::Bucketed, WindowPrecision::Log] {
            let (limiter, _, _) = limiter(1_000, 2, precision, 5_000);
            limiter.consume("k").await.unwrap();
            let status = limiter.get_status("k").await.unwrap();
            assert!(status.allowed);
            assert_eq!(status.remaining, 1);
            assert_eq!(limiter.get_status("k").await.unwrap().remaining, 1);

            limiter.consume("k").await.unwrap();
            assert!(!limiter.get_status("k").await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn test_reset() {
        for precision in [WindowPrecision::Bucketed, WindowPrecision::Log] {
            let (limiter, _, _) = limiter(60_000, 1, precision, 5_000);
            limiter.consume("k").await.unwrap();
            assert!(!limiter.consume("k").await.unwrap().allowed);

            limiter.reset("k").await.unwrap();
            assert!(limiter.consume("k").await.unwrap().allowed);
        }
    }
}
