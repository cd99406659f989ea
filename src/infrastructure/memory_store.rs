//! In-process counter store.
//!
//! Provides a concurrent, sharded `CounterStore` for single-process
//! deployments and tests. Expiry is evaluated lazily against the injected
//! clock whenever a key is touched, so a `MockClock` can move keys past their
//! TTL without sleeping.

use crate::application::ports::{Clock, CounterStore};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    Log(VecDeque<u64>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    /// Expiry deadline (epoch ms), `None` for persistent keys
    expires_at: Option<u64>,
}

impl Slot {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Thread-safe sharded store backed by DashMap.
///
/// DashMap's per-shard locking makes every single-key operation atomic, which
/// is all the limiters rely on. State is local to the process; use the Redis
/// store to share quotas across instances.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    map: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store that expires keys against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.map.iter().filter(|slot| !slot.is_expired(now)).count()
    }

    /// Check if the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key.
    pub fn purge_expired(&self) {
        let now = self.clock.now_millis();
        self.map.retain(|_, slot| !slot.is_expired(now));
    }

    /// Remove all keys.
    pub fn clear(&self) {
        self.map.clear();
    }

    fn deadline(&self, ttl: Duration) -> u64 {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.clock.now_millis().saturating_add(ttl_ms)
    }

    /// Live entry for `key`, with expired slots removed first.
    fn live_entry(&self, key: &str) -> Entry<'_, String, Slot> {
        let now = self.clock.now_millis();
        match self.map.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                self.map.entry(key.to_string())
            }
            entry => entry,
        }
    }
}

fn wrong_type(key: &str, expected: &str) -> StoreError {
    StoreError::InvalidValue {
        key: key.to_string(),
        message: format!("expected {expected}"),
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = self.clock.now_millis();
        match self.map.get(key) {
            Some(slot) if !slot.is_expired(now) => match slot.value {
                Value::Counter(n) => Ok(Some(n)),
                Value::Log(_) => Err(wrong_type(key, "counter")),
            },
            _ => Ok(None),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let expires_at = Some(self.deadline(ttl));
        match self.live_entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Counter(value),
                    expires_at,
                });
                Ok(true)
            }
        }
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let slot = Slot {
            value: Value::Counter(value),
            expires_at: Some(self.deadline(ttl)),
        };
        self.map.insert(key.to_string(), slot);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        match self.live_entry(key) {
            Entry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                Value::Counter(n) => {
                    *n = n.saturating_add(1);
                    Ok(*n)
                }
                Value::Log(_) => Err(wrong_type(key, "counter")),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Counter(1),
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now_millis();
        Ok(self.map.get(key).and_then(|slot| match slot.expires_at {
            Some(deadline) if deadline > now => Some(Duration::from_millis(deadline - now)),
            _ => None,
        }))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.map.remove(key);
        }
        Ok(())
    }

    async fn log_push(
        &self,
        key: &str,
        timestamp_ms: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = Some(self.deadline(ttl));
        match self.live_entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match &mut slot.value {
                    Value::Log(entries) => entries.push_back(timestamp_ms),
                    Value::Counter(_) => return Err(wrong_type(key, "log")),
                }
                slot.expires_at = expires_at;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Log(VecDeque::from([timestamp_ms])),
                    expires_at,
                });
            }
        }
        Ok(())
    }

    async fn log_prune(&self, key: &str, cutoff_ms: u64) -> Result<(), StoreError> {
        if let Entry::Occupied(mut occupied) = self.live_entry(key) {
            match &mut occupied.get_mut().value {
                Value::Log(entries) => entries.retain(|ts| *ts > cutoff_ms),
                Value::Counter(_) => return Err(wrong_type(key, "log")),
            }
        }
        Ok(())
    }

    async fn log_len(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        match self.map.get(key) {
            Some(slot) if !slot.is_expired(now) => match &slot.value {
                Value::Log(entries) => Ok(entries.len() as u64),
                Value::Counter(_) => Err(wrong_type(key, "log")),
            },
            _ => Ok(0),
        }
    }

    async fn log_oldest(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now_millis();
        match self.map.get(key) {
            Some(slot) if !slot.is_expired(now) => match &slot.value {
                Value::Log(entries) => Ok(entries.iter().min().copied()),
                Value::Counter(_) => Err(wrong_type(key, "log")),
            },
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    fn store() -> (InMemoryStore, MockClock) {
        let clock = MockClock::new(0);
        (InMemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_incr_creates_and_counts() {
        let (store, _) = store();
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), Some(2));
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_respects_existing_value() {
        let (store, _) = store();
        assert!(store
            .set_if_absent("k", 0, Duration::from_secs(10))
            .await
            .unwrap());
        store.incr("k").await.unwrap();
        assert!(!store
            .set_if_absent("k", 0, Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_keys_expire_with_clock() {
        let (store, clock) = store();
        store
            .set_with_ttl("k", 5, Duration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(4));
        assert_eq!(
            store.ttl("k").await.unwrap(),
            Some(Duration::from_secs(6))
        );

        clock.advance(Duration::from_secs(6));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
        assert!(store.is_empty());

        // An expired counter restarts from scratch
        assert_eq!(store.incr("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_keeps_expiry() {
        let (store, clock) = store();
        store
            .set_if_absent("k", 0, Duration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3));
        store.incr("k").await.unwrap();
        assert_eq!(
            store.ttl("k").await.unwrap(),
            Some(Duration::from_secs(7))
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _) = store();
        store.incr("a").await.unwrap();
        store.incr("b").await.unwrap();
        store
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_log_operations() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        for ts in [100, 200, 300] {
            store.log_push("log", ts, ttl).await.unwrap();
        }
        assert_eq!(store.log_len("log").await.unwrap(), 3);
        assert_eq!(store.log_oldest("log").await.unwrap(), Some(100));

        store.log_prune("log", 200).await.unwrap();
        assert_eq!(store.log_len("log").await.unwrap(), 1);
        assert_eq!(store.log_oldest("log").await.unwrap(), Some(300));
        assert_eq!(store.log_len("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_an_error() {
        let (store, _) = store();
        store.incr("k").await.unwrap();
        let err = store
            .log_push("k", 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store();
        store
            .set_with_ttl("short", 1, Duration::from_secs(1))
            .await
            .unwrap();
        store.incr("forever").await.unwrap();
        clock.advance(Duration::from_secs(2));
        store.purge_expired();
        assert_eq!(store.len(), 1);
    }
}
