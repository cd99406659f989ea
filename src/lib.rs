//! # outbound-shield
//!
//! Resilience primitives for calls to a volatile third-party API, and reliable
//! delivery of the risk alerts derived from those calls.
//!
//! Three independent components, composed by the caller:
//!
//! - [`RateLimiter`] / [`SlidingWindowRateLimiter`]: per-key quotas kept in a
//!   shared counter store, so every instance of a service enforces one quota.
//! - [`CircuitBreaker`]: stops calling a dependency once it is known to be
//!   failing and probes it again after a cool-down.
//! - [`WebhookDeliveryManager`]: posts masked alert payloads to an HTTP
//!   endpoint with bounded, exponentially backed-off retries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outbound_shield::{
//!     CircuitBreaker, InMemoryStore, Limiter, ProfileIdentity, RateLimitConfig, RateLimiter,
//!     RiskAssessment, SystemClock, WebhookConfig, WebhookDeliveryManager,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(SystemClock::new());
//! let limiter = RateLimiter::new(
//!     InMemoryStore::new(clock.clone()),
//!     RateLimitConfig::new(100, 60, 60)?,
//!     clock,
//! )?;
//! let breaker = CircuitBreaker::builder("profile-api")
//!     .failure_threshold(5)
//!     .reset_timeout(Duration::from_secs(60))
//!     .build()?;
//! let alerts = WebhookDeliveryManager::new(WebhookConfig::new("https://alerts.example.com/risk"))?;
//!
//! if limiter.consume("merchant-7").await?.allowed {
//!     let score = breaker
//!         .execute(|| async { Ok::<u8, String>(92) })
//!         .await
//!         .into_result();
//!     if let Ok(score) = score {
//!         let identity = ProfileIdentity::new("+15551234567", "user-42");
//!         alerts
//!             .send_high_risk(&identity, RiskAssessment::new(score, vec!["velocity".into()]))
//!             .await;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Policy Rejections Are Values
//!
//! Nothing in this crate panics or returns `Err` because a policy said no. A
//! blocked key is a [`RateLimitResult`] with `allowed == false` and a
//! `retry_after`; an open circuit is [`ExecutionError::CircuitOpen`] with the
//! time of the next trial. `Err` is reserved for infrastructure failures such
//! as an unreachable counter store.
//!
//! ## Distributed Deployments
//!
//! The rate limiters are correct across processes that share one store:
//! every counter update is an atomic increment in the store. Use
//! `RedisStore` (feature `redis-storage`) for that; `InMemoryStore` only
//! covers a single process.
//!
//! The circuit breaker is **per-process**. Several instances of a service
//! calling the same dependency each keep their own breaker state and open
//! independently. Breaker checks sit on every call and must stay cheap, so
//! this state is not shared.
//!
//! ## Privacy
//!
//! Phone numbers and identifiers are masked when a payload is built, keeping
//! only the last four characters. Raw identifiers never reach the transport
//! or the logs.
//!
//! ## Testing
//!
//! Time is read through the [`Clock`] port. `infrastructure::mocks` provides
//! a `MockClock` and a `ScriptedTransport` so breaker timeouts, quota windows
//! and retry sequences can be tested without sleeping or a network.

// Domain layer - pure types and rules
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use domain::{
    circuit::{CircuitBreakerMetrics, CircuitState, ExecutionError, ExecutionResult},
    masking::{mask_identifier, mask_phone},
    payload::{
        BatchSummary, MaskedProfile, PayloadMetadata, ProfileIdentity, Recommendation,
        RiskAssessment, RiskLevel, WebhookEvent, WebhookPayload,
    },
    quota::{RateLimitConfig, RateLimitResult, SlidingWindowConfig, WindowPrecision},
};

pub use application::{
    circuit_breaker::{
        CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerRegistry,
    },
    limiter::{Limiter, RateLimiter},
    metrics::WebhookStats,
    ports::{Clock, CounterStore, OutboundRequest, WebhookTransport},
    sliding_window::SlidingWindowRateLimiter,
    webhook::{
        DeliveryResult, MultiWebhookHandler, RetryConfig, WebhookConfig, WebhookDeliveryManager,
    },
};

pub use config::ResilienceConfig;
pub use error::{ConfigError, DeliveryError, StoreError, TransportError};

pub use infrastructure::{clock::SystemClock, http::HttpTransport, memory_store::InMemoryStore};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
