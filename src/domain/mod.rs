//! Domain layer - pure types and rules with no I/O.
//!
//! This layer contains the core concepts of the resilience primitives:
//! - Circuit breaker state machine and execution results
//! - Quota configuration and rate limit results
//! - Alert payloads and identifier masking
//!
//! All types in this layer are pure and easily testable.

pub mod circuit;
pub mod masking;
pub mod payload;
pub mod quota;
