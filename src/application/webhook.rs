//! Webhook delivery with bounded retries.
//!
//! A `WebhookDeliveryManager` owns one endpoint. `send` posts a payload up to
//! `retry.max_attempts` times with exponential backoff between attempts and
//! never returns `Err`: the outcome, attempt count and latency come back as a
//! [`DeliveryResult`].

use crate::application::metrics::{DeliveryMetrics, WebhookStats};
use crate::application::ports::{Clock, OutboundRequest, WebhookTransport};
use crate::domain::payload::{
    BatchSummary, PayloadMetadata, ProfileIdentity, RiskAssessment, WebhookPayload,
};
use crate::error::{ConfigError, DeliveryError};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::http::HttpTransport;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Largest exponent applied to `backoff_ms`.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Headers set by the manager itself. Custom headers cannot replace them.
const MANAGED_HEADERS: [&str; 4] = [
    "content-type",
    "x-webhook-source",
    "x-webhook-event",
    "x-webhook-timestamp",
];

/// Retry behavior of a webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts per payload, including the first
    pub max_attempts: u32,
    /// Delay before the first retry (ms), doubled for each later retry
    pub backoff_ms: u64,
    /// Add a random delay of up to half the backoff to each sleep
    pub jitter: bool,
    /// Keep retrying after a 4xx answer
    pub retry_client_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
            jitter: false,
            retry_client_errors: true,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base = self.backoff_ms.saturating_mul(1_u64 << exponent);
        let extra = if self.jitter && base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(extra))
    }
}

/// Configuration of one webhook endpoint.
///
/// ```
/// use outbound_shield::WebhookConfig;
///
/// let config: WebhookConfig = serde_json::from_str(
///     r#"{"url": "https://alerts.example.com/hook", "retry": {"maxAttempts": 5}}"#,
/// ).unwrap();
/// assert_eq!(config.retry.max_attempts, 5);
/// assert_eq!(config.retry.backoff_ms, 1000);
/// assert_eq!(config.timeout, 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    /// Endpoint receiving the POST requests
    pub url: String,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    pub retry: RetryConfig,
    /// Per-attempt timeout (ms)
    pub timeout: u64,
    /// Value of `X-Webhook-Source` and `metadata.source`
    pub source: String,
    /// Value of `metadata.environment`
    pub environment: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: BTreeMap::new(),
            retry: RetryConfig::default(),
            timeout: 5_000,
            source: "outbound-shield".to_string(),
            environment: "production".to_string(),
        }
    }
}

impl WebhookConfig {
    /// Configuration for `url` with every other setting at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Check the endpoint and limits before any delivery is attempted.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidUrl` for an empty, unparsable or non-HTTP
    /// URL, and `ConfigError::Zero` when `retry.maxAttempts` or `timeout` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: reason.to_string(),
        };
        if self.url.trim().is_empty() {
            return Err(invalid("url is empty"));
        }
        let parsed = reqwest::Url::parse(&self.url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::zero("retry.maxAttempts"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::zero("timeout"));
        }
        Ok(())
    }
}

/// Outcome of delivering one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    /// Whether an attempt was answered with a 2xx
    pub success: bool,
    /// Status of the last response, if any arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Time from the first attempt to the final outcome, backoff included (ms)
    pub latency_ms: u64,
    /// Why the last attempt failed
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub error: Option<DeliveryError>,
}

fn display<S: serde::Serializer>(
    error: &Option<DeliveryError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.collect_str(err),
        None => serializer.serialize_none(),
    }
}

/// Delivers payloads to a single webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookDeliveryManager {
    config: WebhookConfig,
    transport: Arc<dyn WebhookTransport>,
    clock: Arc<dyn Clock>,
    metrics: DeliveryMetrics,
}

impl WebhookDeliveryManager {
    /// Create a manager posting over HTTP.
    ///
    /// # Errors
    /// Returns `ConfigError` if the URL is unusable or a limit is zero.
    pub fn new(config: WebhookConfig) -> Result<Self, ConfigError> {
        Self::with_transport(
            config,
            Arc::new(HttpTransport::new()),
            Arc::new(SystemClock::new()),
        )
    }

    /// Create a manager over a custom transport and clock.
    ///
    /// # Errors
    /// Returns `ConfigError` if the URL is unusable or a limit is zero.
    pub fn with_transport(
        config: WebhookConfig,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            clock,
            metrics: DeliveryMetrics::new(),
        })
    }

    /// Endpoint settings this manager delivers with.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    fn metadata(&self) -> PayloadMetadata {
        PayloadMetadata::new(&self.config.source, &self.config.environment)
    }

    fn now(&self) -> DateTime<Utc> {
        i64::try_from(self.clock.now_millis())
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    fn request(&self, payload: &WebhookPayload, body: Vec<u8>) -> OutboundRequest {
        let mut headers: Vec<(String, String)> = self
            .config
            .headers
            .iter()
            .filter(|(name, _)| !MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.extend([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Webhook-Source".to_string(), self.config.source.clone()),
            ("X-Webhook-Event".to_string(), payload.event.to_string()),
            ("X-Webhook-Timestamp".to_string(), payload.timestamp_header()),
        ]);

        OutboundRequest {
            url: self.config.url.clone(),
            headers,
            body,
            timeout: Duration::from_millis(self.config.timeout),
        }
    }

    /// Deliver `payload`, retrying failed attempts with exponential backoff.
    pub async fn send(&self, payload: &WebhookPayload) -> DeliveryResult {
        let started = Instant::now();
        let event = payload.event;
        let correlation_id = payload.metadata.correlation_id.as_str();

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                let error = DeliveryError::Serialization {
                    message: e.to_string(),
                };
                tracing::error!(%event, correlation_id, error = %error, "Webhook payload rejected");
                self.metrics.record_failure(self.clock.now_millis());
                return DeliveryResult {
                    success: false,
                    status_code: None,
                    attempts: 0,
                    latency_ms: 0,
                    error: Some(error),
                };
            }
        };
        let request = self.request(payload, body);
        let retry = &self.config.retry;

        let mut attempts = 0;
        let mut status_code = None;
        let mut last_error = None;

        while attempts < retry.max_attempts {
            attempts += 1;
            let error = match self.transport.post(request.clone()).await {
                Ok(status) if (200..300).contains(&status) => {
                    let latency_ms = elapsed_ms(started);
                    self.metrics
                        .record_success(latency_ms, self.clock.now_millis());
                    tracing::info!(
                        %event,
                        correlation_id,
                        status,
                        attempts,
                        latency_ms,
                        "Webhook delivered"
                    );
                    return DeliveryResult {
                        success: true,
                        status_code: Some(status),
                        attempts,
                        latency_ms,
                        error: None,
                    };
                }
                Ok(status) => {
                    status_code = Some(status);
                    DeliveryError::HttpStatus { status }
                }
                Err(e) => DeliveryError::from(e),
            };

            tracing::warn!(
                %event,
                correlation_id,
                attempt = attempts,
                max_attempts = retry.max_attempts,
                error = %error,
                "Webhook attempt failed"
            );

            let give_up = !error.is_transient()
                && !(error.is_client_error() && retry.retry_client_errors);
            last_error = Some(error);
            if give_up {
                break;
            }
            if attempts < retry.max_attempts {
                let delay = retry.backoff(attempts);
                tracing::debug!(
                    %event,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Waiting before next webhook attempt"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let latency_ms = elapsed_ms(started);
        self.metrics.record_failure(self.clock.now_millis());
        tracing::error!(
            %event,
            correlation_id,
            attempts,
            latency_ms,
            error = ?last_error,
            "Webhook delivery failed"
        );
        DeliveryResult {
            success: false,
            status_code,
            attempts,
            latency_ms,
            error: last_error,
        }
    }

    /// Alert for a high-risk profile. Identifiers are masked before sending.
    pub async fn send_high_risk(
        &self,
        identity: &ProfileIdentity,
        risk: RiskAssessment,
    ) -> DeliveryResult {
        let payload = WebhookPayload::high_risk(identity, risk, self.metadata(), self.now());
        self.send(&payload).await
    }

    /// Alert for a blocked profile, sent with maximum risk and a block recommendation.
    pub async fn send_profile_blocked(
        &self,
        identity: &ProfileIdentity,
        factors: Vec<String>,
    ) -> DeliveryResult {
        let payload =
            WebhookPayload::profile_blocked(identity, factors, self.metadata(), self.now());
        self.send(&payload).await
    }

    /// Report the totals of a finished screening batch.
    pub async fn send_batch_summary(&self, summary: BatchSummary) -> DeliveryResult {
        let payload = WebhookPayload::batch_completed(summary, self.metadata(), self.now());
        self.send(&payload).await
    }

    /// Send a verification payload and report whether the endpoint accepted it.
    pub async fn verify(&self) -> bool {
        let payload = WebhookPayload::verification(self.metadata(), self.now());
        self.send(&payload).await.success
    }

    /// Snapshot of delivery counters and average latency.
    pub fn stats(&self) -> WebhookStats {
        self.metrics.snapshot()
    }

    /// Zero all delivery counters.
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Fans one payload out to several endpoints.
///
/// Deliveries run concurrently; results come back in the order the managers
/// were added.
#[derive(Debug, Clone, Default)]
pub struct MultiWebhookHandler {
    managers: Vec<WebhookDeliveryManager>,
}

impl MultiWebhookHandler {
    /// Create a handler with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register another endpoint.
    pub fn add(&mut self, manager: WebhookDeliveryManager) -> &mut Self {
        self.managers.push(manager);
        self
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Returns true when no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Deliver `payload` to every endpoint concurrently.
    ///
    /// One endpoint failing does not affect the others.
    pub async fn send(&self, payload: &WebhookPayload) -> Vec<DeliveryResult> {
        join_all(self.managers.iter().map(|m| m.send(payload))).await
    }

    /// Verify every endpoint, in registration order.
    pub async fn verify_all(&self) -> Vec<bool> {
        join_all(self.managers.iter().map(WebhookDeliveryManager::verify)).await
    }

    /// Per-endpoint delivery stats, in registration order.
    pub fn stats(&self) -> Vec<WebhookStats> {
        self.managers.iter().map(WebhookDeliveryManager::stats).collect()
    }
}
