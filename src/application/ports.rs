//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::error::{StoreError, TransportError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Port for obtaining the current wall-clock time.
///
/// Time is expressed in milliseconds since the Unix epoch because breaker
/// deadlines and quota reset times are reported to callers as absolute
/// timestamps. Infrastructure provides `SystemClock` and `MockClock`.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Port for the shared counter store backing the rate limiters.
///
/// Any key-value store with per-key expiry and atomic increment satisfies
/// this contract. Multiple processes sharing one store enforce one quota,
/// since every increment on a key is totally ordered by the store.
///
/// Timestamp logs back the exact sliding-window limiter; a store can
/// implement them with a sorted set.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Read a counter. Missing or expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Set `key` to `value` with the given expiry only if the key is absent.
    ///
    /// Returns true if the value was written.
    async fn set_if_absent(&self, key: &str, value: i64, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Set `key` to `value` with the given expiry, replacing any existing value.
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment a counter and return the new value.
    ///
    /// A missing key is created at 0 with no expiry before incrementing.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Remaining time to live of a key.
    ///
    /// Returns `None` if the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Delete keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Append a timestamp to a log and refresh the log's expiry.
    async fn log_push(&self, key: &str, timestamp_ms: u64, ttl: Duration)
        -> Result<(), StoreError>;

    /// Drop log entries at or before `cutoff_ms`.
    async fn log_prune(&self, key: &str, cutoff_ms: u64) -> Result<(), StoreError>;

    /// Number of entries in a log.
    async fn log_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Oldest entry of a log.
    async fn log_oldest(&self, key: &str) -> Result<Option<u64>, StoreError>;
}

/// A single HTTP POST to a webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Destination URL
    pub url: String,
    /// Headers in send order
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Vec<u8>,
    /// Upper bound for the whole request
    pub timeout: Duration,
}

/// Port for sending one webhook attempt.
///
/// Implementations must abort the request once `timeout` elapses and report
/// it as `TransportError::Timeout`. Retries are not the transport's concern.
#[async_trait]
pub trait WebhookTransport: Send + Sync + Debug {
    /// Send the request and return the HTTP status code.
    async fn post(&self, request: OutboundRequest) -> Result<u16, TransportError>;
}
