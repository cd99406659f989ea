//! Aggregate configuration document.
//!
//! One JSON document configures every component:
//!
//! ```json
//! {
//!   "circuitBreaker": { "failureThreshold": 5, "resetTimeout": 60000 },
//!   "rateLimit": { "points": 100, "duration": 60, "blockDuration": 60 },
//!   "slidingWindow": { "windowSizeMs": 60000, "maxRequests": 100 },
//!   "webhooks": [ { "url": "https://alerts.example.com/risk" } ]
//! }
//! ```
//!
//! Missing sections and fields take their defaults.

use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::webhook::WebhookConfig;
use crate::domain::quota::{RateLimitConfig, SlidingWindowConfig};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Configuration of every component in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub sliding_window: SlidingWindowConfig,
    /// Endpoints alerts are delivered to
    pub webhooks: Vec<WebhookConfig>,
}

impl ResilienceConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed JSON and the first
    /// validation error otherwise.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        self.rate_limit.validate()?;
        self.sliding_window.validate()?;
        for webhook in &self.webhooks {
            webhook.validate()?;
        }
        Ok(())
    }
}
