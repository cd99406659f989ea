//! HTTP transport for webhook delivery.
//!
//! Wraps a pooled `reqwest::Client`. Each attempt carries its own timeout, and
//! reqwest aborts the in-flight request when it expires.

use crate::application::ports::{OutboundRequest, WebhookTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Instant;

/// `WebhookTransport` backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport reusing an existing client and its pool.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, request: OutboundRequest) -> Result<u16, TransportError> {
        let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
        let started = Instant::now();

        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!(
                    status,
                    duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Webhook endpoint responded"
                );
                Ok(status)
            }
            Err(e) if e.is_timeout() => Err(TransportError::Timeout { timeout_ms }),
            Err(e) => Err(TransportError::Network {
                message: e.to_string(),
            }),
        }
    }
}
