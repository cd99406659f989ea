//! Application layer - orchestration of domain logic.
//!
//! This layer runs the domain rules against time, storage and the network:
//! - Circuit breaker (per-process state machine around a risky call)
//! - Rate limiters (fixed and sliding window over a shared counter store)
//! - Webhook delivery (retries, backoff, delivery statistics)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod sliding_window;
pub mod webhook;
