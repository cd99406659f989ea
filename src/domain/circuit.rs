//! Circuit breaker state machine.
//!
//! The breaker's phase is a tagged variant so that counters only exist in the
//! state they belong to: a closed circuit counts failures, an open circuit
//! knows when it may be probed again, and a half-open circuit counts trial
//! successes. Transitions are pure functions of the current phase, the
//! configured thresholds and a timestamp, which keeps them testable without
//! any clock or I/O.

use serde::Serialize;
use std::fmt;

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Operating normally, calls pass through
    Closed,
    /// Failing, calls are rejected without invoking the operation
    Open,
    /// Probing recovery with a limited number of trial calls
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// Internal phase of a breaker with the counters that belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    /// Closed with the number of failures since the last success.
    Closed {
        /// Absolute failure counter, reset by any success
        failures: u32,
    },
    /// Open until `next_attempt` (epoch ms).
    Open {
        /// When the circuit opened (epoch ms)
        opened_at: u64,
        /// Earliest time a trial call is admitted (epoch ms)
        next_attempt: u64,
    },
    /// Half-open with the number of consecutive trial successes.
    HalfOpen {
        /// Consecutive successful trial calls
        successes: u32,
        /// Trial calls currently executing
        in_flight: u32,
    },
}

impl CircuitPhase {
    /// The initial phase of every breaker.
    pub const INITIAL: CircuitPhase = CircuitPhase::Closed { failures: 0 };

    /// The externally visible state of this phase.
    pub fn state(&self) -> CircuitState {
        match self {
            CircuitPhase::Closed { .. } => CircuitState::Closed,
            CircuitPhase::Open { .. } => CircuitState::Open,
            CircuitPhase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Build an open phase starting at `now`.
    pub fn opened(now: u64, reset_timeout_ms: u64) -> Self {
        CircuitPhase::Open {
            opened_at: now,
            next_attempt: now.saturating_add(reset_timeout_ms),
        }
    }

    /// Time at which an open circuit admits its next trial call.
    pub fn next_attempt(&self) -> Option<u64> {
        match self {
            CircuitPhase::Open { next_attempt, .. } => Some(*next_attempt),
            _ => None,
        }
    }
}

impl Default for CircuitPhase {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Decision taken before invoking a protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run the operation. `trial` is set when the call is a half-open probe.
    Permit {
        /// Whether this call is a half-open trial
        trial: bool,
    },
    /// Do not run the operation.
    Reject {
        /// Earliest time the caller should try again (epoch ms)
        next_attempt: u64,
    },
}

/// Thresholds that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Concurrent trial calls admitted while half-open
    pub half_open_max_attempts: u32,
    /// How long the circuit stays open (ms)
    pub reset_timeout_ms: u64,
}

impl CircuitPhase {
    /// Decide whether a call arriving at `now` may run, returning the next phase.
    ///
    /// An open circuit whose `next_attempt` has passed moves to half-open
    /// lazily here, on the first call that observes it.
    pub fn admit(self, now: u64, thresholds: &Thresholds) -> (CircuitPhase, Admission) {
        match self {
            CircuitPhase::Closed { .. } => (self, Admission::Permit { trial: false }),
            CircuitPhase::Open { next_attempt, .. } if now >= next_attempt => (
                CircuitPhase::HalfOpen {
                    successes: 0,
                    in_flight: 1,
                },
                Admission::Permit { trial: true },
            ),
            CircuitPhase::Open { next_attempt, .. } => (self, Admission::Reject { next_attempt }),
            CircuitPhase::HalfOpen {
                successes,
                in_flight,
            } if in_flight < thresholds.half_open_max_attempts => (
                CircuitPhase::HalfOpen {
                    successes,
                    in_flight: in_flight + 1,
                },
                Admission::Permit { trial: true },
            ),
            CircuitPhase::HalfOpen { .. } => (self, Admission::Reject { next_attempt: now }),
        }
    }

    /// Apply a successful call. Returns the next phase.
    ///
    /// Only trial calls count toward closing a half-open circuit. A call
    /// admitted while closed that finishes during the trial leaves the phase
    /// untouched.
    pub fn on_success(self, trial: bool, thresholds: &Thresholds) -> CircuitPhase {
        match self {
            CircuitPhase::Closed { .. } => CircuitPhase::Closed { failures: 0 },
            CircuitPhase::HalfOpen { .. } if !trial => self,
            CircuitPhase::HalfOpen {
                successes,
                in_flight,
            } => {
                let successes = successes.saturating_add(1);
                if successes >= thresholds.success_threshold {
                    CircuitPhase::INITIAL
                } else {
                    CircuitPhase::HalfOpen {
                        successes,
                        in_flight: in_flight.saturating_sub(1),
                    }
                }
            }
            // A call admitted before a forced open finished; the open period stands.
            CircuitPhase::Open { .. } => self,
        }
    }

    /// Apply a failed call. `rate_tripped` reports whether the windowed
    /// failure-rate rule fired for this failure.
    ///
    /// As with successes, only a trial failure reopens a half-open circuit.
    pub fn on_failure(
        self,
        now: u64,
        trial: bool,
        rate_tripped: bool,
        thresholds: &Thresholds,
    ) -> CircuitPhase {
        match self {
            CircuitPhase::Closed { failures } => {
                let failures = failures.saturating_add(1);
                if failures >= thresholds.failure_threshold || rate_tripped {
                    CircuitPhase::opened(now, thresholds.reset_timeout_ms)
                } else {
                    CircuitPhase::Closed { failures }
                }
            }
            CircuitPhase::HalfOpen { .. } if !trial => self,
            CircuitPhase::HalfOpen { .. } => CircuitPhase::opened(now, thresholds.reset_timeout_ms),
            CircuitPhase::Open { .. } => self,
        }
    }
}

/// Read-only snapshot of a breaker's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerMetrics {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Absolute failure counter compared against the failure threshold
    pub failures: u32,
    /// Successful calls since the circuit last closed
    pub successes: u64,
    /// Calls that reached the operation since the circuit last closed
    pub requests: u64,
    /// Calls rejected without invoking the operation
    pub total_blocked: u64,
    /// Failures inside the monitoring window
    pub recent_failures: u32,
    /// Requests inside the monitoring window
    pub recent_requests: u32,
    /// Time of the last failure (epoch ms)
    pub last_failure: Option<u64>,
    /// Time of the last success (epoch ms)
    pub last_success: Option<u64>,
    /// When an open circuit admits its next trial call (epoch ms)
    pub next_attempt: Option<u64>,
}

impl CircuitBreakerMetrics {
    /// Fraction of windowed requests that failed, 0.0 when idle.
    pub fn recent_failure_rate(&self) -> f64 {
        if self.recent_requests == 0 {
            0.0
        } else {
            f64::from(self.recent_failures) / f64::from(self.recent_requests)
        }
    }
}

/// Error carried by a non-successful [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The circuit rejected the call and no fallback was supplied.
    #[error("circuit open until {next_attempt}")]
    CircuitOpen {
        /// Earliest time a call may be admitted (epoch ms)
        next_attempt: u64,
    },
    /// The protected operation ran and failed.
    #[error("operation failed: {0}")]
    Operation(E),
    /// The circuit rejected the call and the fallback failed as well.
    #[error("fallback failed while circuit open: {0}")]
    Fallback(E),
}

impl<E> ExecutionError<E> {
    /// Whether this error is a policy rejection rather than a real failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ExecutionError::CircuitOpen { .. } | ExecutionError::Fallback(_)
        )
    }
}

/// Outcome of running an operation through a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult<T, E> {
    /// The operation ran and succeeded.
    Success(T),
    /// The circuit was open and the fallback produced the value.
    Fallback(T),
    /// The call failed or was rejected.
    Failure(ExecutionError<E>),
}

impl<T, E> ExecutionResult<T, E> {
    /// True only when the protected operation itself succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    /// True when the value came from the fallback.
    pub fn from_fallback(&self) -> bool {
        matches!(self, ExecutionResult::Fallback(_))
    }

    /// The produced value, from the operation or the fallback.
    pub fn data(&self) -> Option<&T> {
        match self {
            ExecutionResult::Success(data) | ExecutionResult::Fallback(data) => Some(data),
            ExecutionResult::Failure(_) => None,
        }
    }

    /// The error, if the call did not produce a value.
    pub fn error(&self) -> Option<&ExecutionError<E>> {
        match self {
            ExecutionResult::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Convert into a `Result`, treating fallback values as success.
    pub fn into_result(self) -> Result<T, ExecutionError<E>> {
        match self {
            ExecutionResult::Success(data) | ExecutionResult::Fallback(data) => Ok(data),
            ExecutionResult::Failure(err) => Err(err),
        }
    }
}
