//! Delivery statistics for webhook endpoints.
//!
//! Latency is averaged incrementally so no samples are stored.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// Snapshot of delivery statistics for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStats {
    /// Payloads handed to `send`, delivered or not
    pub total_sent: u64,
    /// Payloads acknowledged with a 2xx
    pub successful: u64,
    /// Payloads that exhausted their attempts
    pub failed: u64,
    /// Mean end-to-end latency of successful deliveries (ms)
    pub average_latency_ms: f64,
    /// Time of the last success (epoch ms)
    pub last_success_at: Option<u64>,
    /// Time of the last failure (epoch ms)
    pub last_failure_at: Option<u64>,
}

impl WebhookStats {
    /// Fraction of sent payloads that were delivered, 0.0 before any send.
    pub fn success_rate(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_sent as f64
        }
    }
}

/// Shared handle updating a [`WebhookStats`].
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct DeliveryMetrics {
    inner: Arc<Mutex<WebhookStats>>,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self, latency_ms: u64, at: u64) {
        let mut stats = self.lock();
        stats.total_sent += 1;
        stats.successful += 1;
        // Running mean over successes only.
        let n = stats.successful as f64;
        stats.average_latency_ms += (latency_ms as f64 - stats.average_latency_ms) / n;
        stats.last_success_at = Some(at);
    }

    pub(crate) fn record_failure(&self, at: u64) {
        let mut stats = self.lock();
        stats.total_sent += 1;
        stats.failed += 1;
        stats.last_failure_at = Some(at);
    }

    /// Current statistics.
    pub fn snapshot(&self) -> WebhookStats {
        self.lock().clone()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.lock() = WebhookStats::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WebhookStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let metrics = DeliveryMetrics::new();
        let stats = metrics.snapshot();
        assert_eq!(stats, WebhookStats::default());
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_running_average_latency() {
        let metrics = DeliveryMetrics::new();
        metrics.record_success(100, 1);
        metrics.record_success(200, 2);
        metrics.record_success(600, 3);

        let stats = metrics.snapshot();
        assert_eq!(stats.successful, 3);
        assert!((stats.average_latency_ms - 300.0).abs() < 1e-9);
        assert_eq!(stats.last_success_at, Some(3));
    }

    #[test]
    fn test_failures_do_not_move_average() {
        let metrics = DeliveryMetrics::new();
        metrics.record_success(50, 1);
        metrics.record_failure(2);
        metrics.record_failure(3);

        let stats = metrics.snapshot();
        assert_eq!(stats.total_sent, 3);
        assert_eq!(stats.failed, 2);
        assert!((stats.average_latency_ms - 50.0).abs() < 1e-9);
        assert_eq!(stats.last_failure_at, Some(3));
        assert!((stats.success_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let metrics = DeliveryMetrics::new();
        metrics.record_success(10, 1);
        metrics.record_failure(2);
        metrics.reset();
        assert_eq!(metrics.snapshot(), WebhookStats::default());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = DeliveryMetrics::new();
        let clone = metrics.clone();
        clone.record_failure(1);
        assert_eq!(metrics.snapshot().failed, 1);
    }
}
