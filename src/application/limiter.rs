//! Fixed-window rate limiting over a shared counter store.
//!
//! Each key owns a counter that expires `duration` seconds after its first
//! use. Exceeding the quota sets a separate block marker that lives for
//! `block_duration` seconds, so a blocked caller stays blocked even after the
//! counting window rolls over.

use crate::application::ports::{Clock, CounterStore};
use crate::domain::quota::{ceil_secs, RateLimitConfig, RateLimitResult};
use crate::error::{ConfigError, StoreError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Common interface of the fixed and sliding window limiters.
///
/// Policy rejections are `Ok` results with `allowed == false`. `Err` is
/// reserved for store failures.
#[async_trait]
pub trait Limiter: Send + Sync + Debug {
    /// Count one operation for `key` and decide whether it may proceed.
    async fn consume(&self, key: &str) -> Result<RateLimitResult, StoreError>;

    /// Report what `consume` would decide without counting anything.
    async fn get_status(&self, key: &str) -> Result<RateLimitResult, StoreError>;

    /// Forget all state for `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}

/// Default key prefix of the fixed-window limiter.
pub const DEFAULT_PREFIX: &str = "rate_limit";

/// Fixed-window limiter with blocking.
///
/// Correct across processes as long as they share one store: every counter
/// update goes through the store's atomic increment.
///
/// # Example
///
/// ```
/// use outbound_shield::{InMemoryStore, Limiter, RateLimitConfig, RateLimiter, SystemClock};
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let clock = Arc::new(SystemClock::new());
/// let store = InMemoryStore::new(clock.clone());
/// let limiter = RateLimiter::new(store, RateLimitConfig::new(2, 60, 120).unwrap(), clock).unwrap();
///
/// assert!(limiter.consume("merchant-7").await.unwrap().allowed);
/// assert!(limiter.consume("merchant-7").await.unwrap().allowed);
/// assert!(!limiter.consume("merchant-7").await.unwrap().allowed);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter<S> {
    store: S,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    prefix: String,
    fail_open: bool,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a limiter over `store`.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(store: S, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
            prefix: DEFAULT_PREFIX.to_string(),
            fail_open: false,
        })
    }

    /// Use a different key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Allow operations through when the store is unreachable.
    ///
    /// Off by default: store errors are returned to the caller.
    pub fn fail_open(mut self, enabled: bool) -> Self {
        self.fail_open = enabled;
        self
    }

    /// Quota settings in effect.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn blocked_key(&self, key: &str) -> String {
        format!("{}:{}:blocked", self.prefix, key)
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.duration)
    }

    /// Remaining block time, if `key` is currently blocked.
    async fn block_remaining(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let blocked_key = self.blocked_key(key);
        if self.store.get(&blocked_key).await?.is_none() {
            return Ok(None);
        }
        let remaining = self.store.ttl(&blocked_key).await?;
        Ok(Some(remaining.unwrap_or(Duration::ZERO)))
    }

    fn blocked_result(&self, now: u64, remaining: Duration) -> RateLimitResult {
        let remaining_ms = duration_ms(remaining);
        RateLimitResult::rejected(ceil_secs(remaining_ms), now.saturating_add(remaining_ms))
    }

    async fn try_consume(&self, key: &str) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_millis();

        if let Some(remaining) = self.block_remaining(key).await? {
            return Ok(self.blocked_result(now, remaining));
        }

        let counter_key = self.counter_key(key);
        self.store
            .set_if_absent(&counter_key, 0, self.window())
            .await?;
        let count = self.store.incr(&counter_key).await?;

        let ttl = match self.store.ttl(&counter_key).await? {
            Some(ttl) => ttl,
            None => {
                // The counter expired between initialization and increment and
                // was recreated without a TTL.
                self.store
                    .set_with_ttl(&counter_key, count, self.window())
                    .await?;
                self.window()
            }
        };
        let reset_at = now.saturating_add(duration_ms(ttl));

        if count > i64::from(self.config.points) {
            if self.config.block_duration == 0 {
                // Blocking disabled: reject until the window rolls over.
                return Ok(RateLimitResult::rejected(
                    ceil_secs(duration_ms(ttl)),
                    reset_at,
                ));
            }
            let block = Duration::from_secs(self.config.block_duration);
            self.store
                .set_with_ttl(&self.blocked_key(key), 1, block)
                .await?;
            tracing::warn!(
                key = %key,
                count,
                points = self.config.points,
                block_duration = self.config.block_duration,
                "Rate limit exceeded, key blocked"
            );
            return Ok(RateLimitResult::rejected(
                self.config.block_duration,
                now.saturating_add(duration_ms(block)),
            ));
        }

        let remaining = u32::try_from(i64::from(self.config.points) - count).unwrap_or(0);
        Ok(RateLimitResult::allowed(remaining, reset_at))
    }

    async fn try_status(&self, key: &str) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_millis();

        if let Some(remaining) = self.block_remaining(key).await? {
            return Ok(self.blocked_result(now, remaining));
        }

        let counter_key = self.counter_key(key);
        let count = self.store.get(&counter_key).await?.unwrap_or(0);
        let ttl = self
            .store
            .ttl(&counter_key)
            .await?
            .unwrap_or_else(|| self.window());
        let reset_at = now.saturating_add(duration_ms(ttl));

        if count >= i64::from(self.config.points) {
            return Ok(RateLimitResult::rejected(
                ceil_secs(duration_ms(ttl)),
                reset_at,
            ));
        }
        let remaining = u32::try_from(i64::from(self.config.points) - count).unwrap_or(0);
        Ok(RateLimitResult::allowed(remaining, reset_at))
    }

    fn open_result(&self, key: &str, err: &StoreError) -> RateLimitResult {
        tracing::warn!(key = %key, error = %err, "Counter store unavailable, allowing operation");
        let now = self.clock.now_millis();
        RateLimitResult::allowed(
            self.config.points,
            now.saturating_add(duration_ms(self.window())),
        )
    }
}

#[async_trait]
impl<S: CounterStore> Limiter for RateLimiter<S> {
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
        self.store
            .delete(&[self.counter_key(key), self.blocked_key(key)])
            .await
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
