//! Redis-backed counter store.
//!
//! Provides a distributed `CounterStore` using Redis, allowing quota state to
//! be shared across multiple application instances.
//!
//! ## Architecture
//!
//! - Counters are plain integer keys driven by `INCR`
//! - Expiry uses native key TTLs (`SET ... PX`, `PTTL`)
//! - Initialization uses `SET ... NX PX` so concurrent instances never reset
//!   a counter another instance has already incremented
//! - Timestamp logs are sorted sets scored by epoch milliseconds
//!
//! Connection handling goes through `redis::aio::ConnectionManager`, which
//! reconnects transparently after a dropped connection.
//!
//! ## Example
//!
//! ```rust,ignore
//! use outbound_shield::{RateLimiter, RateLimitConfig, RedisStore, RedisStoreConfig, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::connect_with_config(
//!         "redis://127.0.0.1/",
//!         RedisStoreConfig { key_namespace: Some("payments".to_string()) },
//!     )
//!     .await
//!     .expect("Failed to connect to Redis");
//!
//!     let config = RateLimitConfig::new(10, 60, 120).unwrap();
//!     let limiter = RateLimiter::new(store, config, Arc::new(SystemClock::new()));
//! }
//! ```

use crate::application::ports::CounterStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for Redis storage.
#[derive(Debug, Clone, Default)]
pub struct RedisStoreConfig {
    /// Optional namespace prepended to every key as `{namespace}:`
    pub key_namespace: Option<String>,
}

/// Redis-backed counter store for distributed rate limiting.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::debug!(namespace = ?config.key_namespace, "Connected counter store to Redis");

        Ok(Self { connection, config })
    }

    fn key(&self, key: &str) -> String {
        match &self.config.key_namespace {
            Some(namespace) => format!("{namespace}:{key}"),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<i64> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(self.key(key), 1).await?;
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection.clone();
        // -2: missing key, -1: no expiry
        let remaining: i64 = redis::cmd("PTTL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn log_push(
        &self,
        key: &str,
        timestamp_ms: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let key = self.key(key);
        // Members must be unique or two requests in the same millisecond collapse.
        let member = format!("{timestamp_ms}-{}", Uuid::new_v4());
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(timestamp_ms)
            .arg(member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn log_prune(&self, key: &str, cutoff_ms: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.key(key))
            .arg("-inf")
            .arg(cutoff_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn log_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let len: u64 = redis::cmd("ZCARD")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn log_oldest(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.key(key))
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(entries.first().map(|(_, score)| *score as u64))
    }
}
