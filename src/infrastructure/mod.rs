//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Counter stores (in-process DashMap, shared Redis)
//! - HTTP transport for webhook delivery (reqwest)

pub mod clock;
pub mod http;
pub mod memory_store;

#[cfg(feature = "redis-storage")]
pub mod redis_store;

/// Mock implementations for testing.
///
/// Controllable test doubles for the clock and the webhook transport. They are
/// compiled unconditionally so integration tests and downstream crates can use
/// them without extra features.
pub mod mocks;
