//! Quota configuration and results for rate limiting.
//!
//! These types carry no I/O. The limiters in the application layer combine
//! them with a counter store.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Fixed-window quota: `points` operations per `duration` seconds.
///
/// Exceeding the quota blocks the key for `block_duration` seconds, which may
/// outlive the counting window itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Maximum operations per window
    pub points: u32,
    /// Window length in seconds
    pub duration: u64,
    /// Seconds a key stays blocked after exceeding its quota
    pub block_duration: u64,
}

impl RateLimitConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::Zero` if `points` or `duration` is zero.
    pub fn new(points: u32, duration: u64, block_duration: u64) -> Result<Self, ConfigError> {
        let config = Self {
            points,
            duration,
            block_duration,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the `points >= 1` and `duration >= 1` invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.points == 0 {
            return Err(ConfigError::zero("points"));
        }
        if self.duration == 0 {
            return Err(ConfigError::zero("duration"));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            points: 100,
            duration: 60,
            block_duration: 60,
        }
    }
}

/// How a sliding window limiter measures its window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowPrecision {
    /// One counter per fixed bucket of `window_size_ms`.
    ///
    /// Cheap (a single counter per bucket) but approximate: a burst straddling
    /// a bucket boundary can reach up to twice `max_requests` within one
    /// window length.
    #[default]
    Bucketed,
    /// A log of per-request timestamps pruned on every read.
    ///
    /// Exact, at the cost of storing one entry per admitted request.
    Log,
}

/// Sliding window quota: `max_requests` per `window_size_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlidingWindowConfig {
    /// Window length in milliseconds
    pub window_size_ms: u64,
    /// Maximum requests per window
    pub max_requests: u32,
    /// Bucket approximation or exact log
    pub precision: WindowPrecision,
}

impl SlidingWindowConfig {
    /// Create a validated bucketed configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::Zero` if either value is zero.
    pub fn new(window_size_ms: u64, max_requests: u32) -> Result<Self, ConfigError> {
        let config = Self {
            window_size_ms,
            max_requests,
            precision: WindowPrecision::Bucketed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Switch to a different precision.
    pub fn with_precision(mut self, precision: WindowPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// # Errors
    /// Returns `ConfigError::Zero` when the window or the request limit is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size_ms == 0 {
            return Err(ConfigError::zero("windowSizeMs"));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::zero("maxRequests"));
        }
        Ok(())
    }

    /// Bucket containing `now`.
    pub fn bucket_id(&self, now: u64) -> u64 {
        now / self.window_size_ms
    }

    /// Start of the bucket after the one containing `now` (epoch ms).
    pub fn next_bucket_start(&self, now: u64) -> u64 {
        (self.bucket_id(now) + 1).saturating_mul(self.window_size_ms)
    }
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size_ms: 60_000,
            max_requests: 100,
            precision: WindowPrecision::Bucketed,
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the operation may proceed
    pub allowed: bool,
    /// Operations left in the current window
    pub remaining: u32,
    /// Seconds to wait before trying again, set on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// When the current window or block ends (epoch ms)
    pub reset_at: u64,
}

impl RateLimitResult {
    /// An admitted operation.
    pub fn allowed(remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
            reset_at,
        }
    }

    /// A rejected operation that may retry after `retry_after` seconds.
    pub fn rejected(retry_after: u64, reset_at: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
            reset_at,
        }
    }
}

/// Round a millisecond wait up to whole seconds.
pub fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_validation() {
        assert!(RateLimitConfig::new(3, 60, 120).is_ok());
        assert_eq!(
            RateLimitConfig::new(0, 60, 120),
            Err(ConfigError::zero("points"))
        );
        assert_eq!(
            RateLimitConfig::new(3, 0, 120),
            Err(ConfigError::zero("duration"))
        );
    }

    #[test]
    fn test_block_duration_may_be_zero() {
        assert!(RateLimitConfig::new(1, 1, 0).is_ok());
    }

    #[test]
    fn test_bucket_math() {
        let config = SlidingWindowConfig::new(1_000, 2).unwrap();
        assert_eq!(config.bucket_id(0), 0);
        assert_eq!(config.bucket_id(999), 0);
        assert_eq!(config.bucket_id(1_000), 1);
        assert_eq!(config.next_bucket_start(1_250), 2_000);
        assert_eq!(config.next_bucket_start(2_000), 3_000);
    }

    #[test]
    fn test_sliding_config_deserializes_camel_case() {
        let config: SlidingWindowConfig =
            serde_json::from_str(r#"{"windowSizeMs": 500, "maxRequests": 4, "precision": "log"}"#)
                .unwrap();
        assert_eq!(config.window_size_ms, 500);
        assert_eq!(config.max_requests, 4);
        assert_eq!(config.precision, WindowPrecision::Log);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(0), 0);
        assert_eq!(ceil_secs(1), 1);
        assert_eq!(ceil_secs(1_000), 1);
        assert_eq!(ceil_secs(1_001), 2);
    }

    #[test]
    fn test_result_serialization_omits_retry_after() {
        let json = serde_json::to_value(RateLimitResult::allowed(2, 10)).unwrap();
        assert_eq!(json["allowed"], true);
        assert!(json.get("retryAfter").is_none());

        let json = serde_json::to_value(RateLimitResult::rejected(120, 10)).unwrap();
        assert_eq!(json["retryAfter"], 120);
    }
}
