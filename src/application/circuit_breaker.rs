//! Circuit breaker for calls to an unreliable dependency.
//!
//! Wraps a risky operation and stops invoking it once it is known to be
//! failing. After `reset_timeout` the next call is let through as a trial; a
//! successful trial closes the circuit again, a failed one reopens it.
//!
//! Breaker state lives in this process only. Several instances of a service
//! calling the same dependency each keep their own breaker, unlike the rate
//! limiters whose counters live in a shared store. Checking the breaker on
//! every call must stay cheap, so this is not unified.

use crate::application::ports::Clock;
use crate::domain::circuit::{
    Admission, CircuitBreakerMetrics, CircuitPhase, CircuitState, ExecutionError, ExecutionResult,
    Thresholds,
};
use crate::error::ConfigError;
use crate::infrastructure::clock::SystemClock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Configuration for circuit breaker behavior.
///
/// Deserializes from the camelCase JSON surface with durations in milliseconds:
/// `{"failureThreshold": 5, "resetTimeout": 60000, "halfOpenMaxAttempts": 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    /// Failures that open a closed circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call (ms)
    pub reset_timeout: u64,
    /// Trial calls admitted concurrently while half-open
    pub half_open_max_attempts: u32,
    /// Consecutive trial successes needed to close the circuit
    pub success_threshold: u32,
    /// Window for the failure-rate rule (ms); `None` disables the rule
    pub monitoring_window: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: 60_000,
            half_open_max_attempts: 1,
            success_threshold: 1,
            monitoring_window: Some(60_000),
        }
    }
}

impl CircuitBreakerConfig {
    /// Check that every threshold is at least 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::zero("failureThreshold"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::zero("successThreshold"));
        }
        if self.half_open_max_attempts == 0 {
            return Err(ConfigError::zero("halfOpenMaxAttempts"));
        }
        if self.monitoring_window == Some(0) {
            return Err(ConfigError::zero("monitoringWindow"));
        }
        Ok(())
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            half_open_max_attempts: self.half_open_max_attempts,
            reset_timeout_ms: self.reset_timeout,
        }
    }
}

/// Fraction of windowed requests that must fail for the rate rule to trip.
const FAILURE_RATE_LIMIT: f64 = 0.5;

#[derive(Debug, Default)]
struct BreakerInner {
    phase: CircuitPhase,
    /// Absolute failure counter, kept while open for reporting
    failures: u32,
    successes: u64,
    requests: u64,
    total_blocked: u64,
    last_failure: Option<u64>,
    last_success: Option<u64>,
    /// Failure timestamps inside the monitoring window
    failure_log: VecDeque<u64>,
    /// Admitted request timestamps inside the monitoring window
    request_log: VecDeque<u64>,
}

impl BreakerInner {
    fn prune(&mut self, now: u64, window: Option<u64>) {
        let Some(window) = window else {
            self.failure_log.clear();
            self.request_log.clear();
            return;
        };
        let cutoff = now.saturating_sub(window);
        while self.failure_log.front().is_some_and(|ts| *ts < cutoff) {
            self.failure_log.pop_front();
        }
        while self.request_log.front().is_some_and(|ts| *ts < cutoff) {
            self.request_log.pop_front();
        }
    }

    fn zero_counters(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.requests = 0;
        self.total_blocked = 0;
        self.failure_log.clear();
        self.request_log.clear();
    }
}

/// Circuit breaker guarding one logical dependency.
///
/// `execute` never panics and never returns `Err`; every outcome, including a
/// rejection by an open circuit, is an [`ExecutionResult`].
///
/// # Example
///
/// ```
/// use outbound_shield::{CircuitBreaker, CircuitState};
///
/// # tokio_test_block_on(async {
/// let breaker = CircuitBreaker::builder("profile-api")
///     .failure_threshold(2)
///     .build()
///     .unwrap();
///
/// let result = breaker
///     .execute(|| async { Ok::<_, String>("profile") })
///     .await;
/// assert!(result.is_success());
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker with default configuration and the system clock.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            inner: Mutex::new(BreakerInner::default()),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Create a breaker with custom configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn with_config(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_config_and_clock(name, config, Arc::new(SystemClock::new()))
    }

    /// Create a breaker with custom configuration and clock.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn with_config_and_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            clock,
        })
    }

    /// Start building a breaker.
    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(name)
    }

    /// Breaker name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored circuit state.
    ///
    /// An open circuit past its `next_attempt` still reports `Open`; it moves
    /// to `HalfOpen` on the next `execute`.
    pub fn state(&self) -> CircuitState {
        self.lock().phase.state()
    }

    /// Whether a call made now would reach the operation. Does not change state.
    pub fn is_call_permitted(&self) -> bool {
        let now = self.clock.now_millis();
        let phase = self.lock().phase;
        matches!(
            phase.admit(now, &self.config.thresholds()).1,
            Admission::Permit { .. }
        )
    }

    /// Run `operation` through the breaker.
    ///
    /// While the circuit is open the operation is not invoked and the result
    /// is `ExecutionError::CircuitOpen`.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> ExecutionResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(
            operation,
            None::<fn() -> std::future::Ready<Result<T, E>>>,
        )
        .await
    }

    /// Run `operation` through the breaker, answering from `fallback` while open.
    ///
    /// The fallback only runs when the circuit rejects the call; a failing
    /// operation is reported as a failure, not masked by the fallback.
    pub async fn execute_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: G,
    ) -> ExecutionResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        self.run(operation, Some(fallback)).await
    }

    async fn run<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: Option<G>,
    ) -> ExecutionResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Admission::Permit { trial } => {
                // The lock is never held across the operation.
                let guard = TrialGuard {
                    breaker: self,
                    armed: trial,
                };
                let outcome = operation().await;
                guard.disarm();
                match outcome {
                    Ok(data) => {
                        self.record_success(trial);
                        ExecutionResult::Success(data)
                    }
                    Err(err) => {
                        self.record_failure(trial);
                        ExecutionResult::Failure(ExecutionError::Operation(err))
                    }
                }
            }
            Admission::Reject { next_attempt } => match fallback {
                Some(fallback) => match fallback().await {
                    Ok(data) => ExecutionResult::Fallback(data),
                    Err(err) => ExecutionResult::Failure(ExecutionError::Fallback(err)),
                },
                None => ExecutionResult::Failure(ExecutionError::CircuitOpen { next_attempt }),
            },
        }
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        let previous = inner.phase.state();
        let (phase, admission) = inner.phase.admit(now, &self.config.thresholds());
        inner.phase = phase;

        match admission {
            Admission::Permit { .. } => {
                inner.requests += 1;
                inner.request_log.push_back(now);
                inner.prune(now, self.config.monitoring_window);
            }
            Admission::Reject { next_attempt } => {
                inner.total_blocked += 1;
                tracing::debug!(
                    breaker = %self.name,
                    next_attempt,
                    total_blocked = inner.total_blocked,
                    "Call rejected by open circuit"
                );
            }
        }

        if previous != phase.state() {
            tracing::info!(
                breaker = %self.name,
                from = %previous,
                to = %phase.state(),
                "Circuit breaker state changed"
            );
        }
        admission
    }

    fn record_success(&self, trial: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        let previous = inner.phase.state();
        inner.successes += 1;
        inner.last_success = Some(now);
        if previous == CircuitState::Closed {
            inner.failures = 0;
        }
        inner.phase = inner.phase.on_success(trial, &self.config.thresholds());

        if previous == CircuitState::HalfOpen && inner.phase.state() == CircuitState::Closed {
            inner.zero_counters();
            tracing::info!(
                breaker = %self.name,
                from = %previous,
                to = %CircuitState::Closed,
                "Circuit breaker recovered"
            );
        }
    }

    fn record_failure(&self, trial: bool) {
        let now = self.clock.now_millis();
        let window = self.config.monitoring_window;
        let mut inner = self.lock();
        let previous = inner.phase.state();

        inner.last_failure = Some(now);
        inner.failures = inner.failures.saturating_add(1);
        inner.failure_log.push_back(now);
        inner.prune(now, window);

        let rate_tripped = window.is_some() && self.failure_rate_exceeded(&inner);
        inner.phase = inner
            .phase
            .on_failure(now, trial, rate_tripped, &self.config.thresholds());

        if let CircuitPhase::Open { next_attempt, .. } = inner.phase {
            if previous != CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    from = %previous,
                    trial,
                    recent_failures = inner.failure_log.len(),
                    recent_requests = inner.request_log.len(),
                    next_attempt,
                    "Circuit breaker opened"
                );
            }
        }
    }

    fn failure_rate_exceeded(&self, inner: &BreakerInner) -> bool {
        let failures = inner.failure_log.len();
        let requests = inner.request_log.len();
        if requests == 0 {
            return false;
        }
        let rate = failures as f64 / requests as f64;
        rate > FAILURE_RATE_LIMIT && failures >= self.config.failure_threshold as usize
    }

    /// Snapshot of the breaker's counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.phase.state(),
            failures: inner.failures,
            successes: inner.successes,
            requests: inner.requests,
            total_blocked: inner.total_blocked,
            recent_failures: inner.failure_log.len().try_into().unwrap_or(u32::MAX),
            recent_requests: inner.request_log.len().try_into().unwrap_or(u32::MAX),
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            next_attempt: inner.phase.next_attempt(),
        }
    }

    /// Open the circuit now, regardless of recent outcomes.
    pub fn force_open(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.phase = CircuitPhase::opened(now, self.config.reset_timeout);
        tracing::warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    /// Close the circuit now and clear its failure history.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.phase = CircuitPhase::INITIAL;
        inner.failures = 0;
        inner.failure_log.clear();
        inner.request_log.clear();
        tracing::info!(breaker = %self.name, "Circuit breaker forced closed");
    }

    /// Return to the initial closed state with zeroed counters.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::default();
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Every update leaves the state consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns a half-open trial slot if the operation future is dropped mid-call.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.breaker.lock();
        if let CircuitPhase::HalfOpen {
            successes,
            in_flight,
        } = inner.phase
        {
            inner.phase = CircuitPhase::HalfOpen {
                successes,
                in_flight: in_flight.saturating_sub(1),
            };
        }
    }
}

/// Builder for constructing a `CircuitBreaker`.
#[derive(Debug)]
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl CircuitBreakerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            clock: None,
        }
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Failures that open a closed circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Cool-down before an open circuit admits a trial call.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Trial calls allowed in flight while half-open.
    pub fn half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.config.half_open_max_attempts = attempts;
        self
    }

    /// Successful trials needed to close a half-open circuit.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Window for the failure-rate rule; `None` disables the rule.
    pub fn monitoring_window(mut self, window: Option<Duration>) -> Self {
        self.config.monitoring_window =
            window.map(|w| u64::try_from(w.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Use a custom clock (e.g. `MockClock` in tests).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the breaker.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        CircuitBreaker::with_config_and_clock(self.name, self.config, clock)
    }
}

/// Caller-owned collection of named breakers.
///
/// One breaker per logical dependency, created on first use. The registry is
/// an ordinary value passed to whoever needs it; nothing about it is global.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `defaults`.
    ///
    /// # Errors
    /// Returns `ConfigError` if the default configuration is invalid.
    pub fn new(defaults: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            clock,
            breakers: Mutex::new(HashMap::new()),
        })
    }

    /// Breaker for `name`, created with the default configuration if missing.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker {
                name: name.to_string(),
                config: self.defaults.clone(),
                inner: Mutex::new(BreakerInner::default()),
                clock: Arc::clone(&self.clock),
            })
        });
        Arc::clone(breaker)
    }

    /// Register a breaker with its own configuration, replacing any existing one.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn insert(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let breaker = Arc::new(CircuitBreaker::with_config_and_clock(
            name,
            config,
            Arc::clone(&self.clock),
        )?);
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Breaker for `name`, if one exists.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Metrics of every breaker, sorted by name.
    pub fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut metrics: Vec<_> = breakers.iter().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Reset every breaker to its initial state.
    pub fn reset_all(&self) {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when no breaker has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new(1_000_000);
        let cb = CircuitBreaker::with_config_and_clock("test", config, Arc::new(clock.clone()))
            .unwrap();
        (cb, clock)
    }

    fn config(failure_threshold: u32, reset_timeout: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout,
            ..Default::default()
        }
    }

    async fn fail(cb: &CircuitBreaker) -> ExecutionResult<(), String> {
        cb.execute(|| async { Err::<(), _>("boom".to_string()) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> ExecutionResult<(), String> {
        cb.execute(|| async { Ok::<_, String>(()) }).await
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (cb, _) = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_call_permitted());
        let metrics = cb.metrics();
        assert_eq!(metrics.failures, 0);
        assert_eq!(metrics.requests, 0);
        assert_eq!(metrics.next_attempt, None);
    }

    #[tokio::test]
    async fn test_failure_threshold() {
        let (cb, _) = breaker(config(3, 1_000));

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 2);

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let (cb, clock) = breaker(config(2, 10_000));
        fail(&cb).await;
        fail(&cb).await;

        let calls = AtomicU32::new(0);
        let result: ExecutionResult<(), String> = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            result.error(),
            Some(&ExecutionError::CircuitOpen {
                next_attempt: clock.now_millis() + 10_000
            })
        );
        assert_eq!(cb.metrics().total_blocked, 1);
    }

    #[tokio::test]
    async fn test_fallback_used_while_open() {
        let (cb, _) = breaker(config(1, 10_000));
        fail(&cb).await;

        let result = cb
            .execute_with_fallback(
                || async { Ok::<_, String>("live") },
                || async { Ok("cached") },
            )
            .await;
        assert!(result.from_fallback());
        assert_eq!(result.data(), Some(&"cached"));

        let result = cb
            .execute_with_fallback(
                || async { Ok::<&str, String>("live") },
                || async { Err("cache miss".to_string()) },
            )
            .await;
        assert_eq!(
            result.error(),
            Some(&ExecutionError::Fallback("cache miss".to_string()))
        );
        assert_eq!(cb.metrics().total_blocked, 2);
    }

    #[tokio::test]
    async fn test_fallback_not_used_when_closed() {
        let (cb, _) = breaker(config(5, 10_000));
        let result = cb
            .execute_with_fallback(
                || async { Err::<&str, _>("down".to_string()) },
                || async { Ok("cached") },
            )
            .await;
        assert_eq!(
            result.error(),
            Some(&ExecutionError::Operation("down".to_string()))
        );
    }

    #[tokio::test]
    async fn test_recovery_after_timeout() {
        let (cb, clock) = breaker(config(2, 100));
        fail(&cb).await;
        fail(&cb).await;
        assert!(!cb.is_call_permitted());

        clock.advance(Duration::from_millis(100));
        assert!(cb.is_call_permitted());
        // Still reported open until a call observes the deadline
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(succeed(&cb).await.is_success());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_circuit() {
        let (cb, clock) = breaker(config(2, 100));
        fail(&cb).await;
        fail(&cb).await;
        clock.advance(Duration::from_millis(150));

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().next_attempt, Some(clock.now_millis() + 100));
    }

    #[tokio::test]
    async fn test_success_threshold_in_half_open() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            success_threshold: 3,
            ..config(1, 100)
        });
        fail(&cb).await;
        clock.advance(Duration::from_millis(100));

        succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);

        let metrics = cb.metrics();
        assert_eq!(metrics.failures, 0);
        assert_eq!(metrics.successes, 0);
        assert_eq!(metrics.requests, 0);
        assert_eq!(metrics.total_blocked, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (cb, _) = breaker(config(3, 100));
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.metrics().failures, 2);

        succeed(&cb).await;
        assert_eq!(cb.metrics().failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failure_rate_rule_opens_circuit() {
        // Successes keep resetting the absolute counter, but 3 of 5 recent
        // requests failed, which is above half and at the threshold.
        let (cb, clock) = breaker(CircuitBreakerConfig {
            monitoring_window: Some(10_000),
            ..config(3, 1_000)
        });
        fail(&cb).await;
        succeed(&cb).await;
        fail(&cb).await;
        succeed(&cb).await;
        clock.advance(Duration::from_millis(10));
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_failure_rate_ignores_old_failures() {
        let (cb, clock) = breaker(CircuitBreakerConfig {
            monitoring_window: Some(1_000),
            ..config(3, 1_000)
        });
        fail(&cb).await;
        succeed(&cb).await;
        fail(&cb).await;
        succeed(&cb).await;
        clock.advance(Duration::from_secs(5));

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().recent_failures, 1);
    }

    #[tokio::test]
    async fn test_rate_rule_disabled_without_window() {
        let (cb, _) = breaker(CircuitBreakerConfig {
            monitoring_window: None,
            ..config(3, 1_000)
        });
        for _ in 0..5 {
            fail(&cb).await;
            succeed(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_budget() {
        let (cb, clock) = breaker(config(1, 100));
        fail(&cb).await;
        clock.advance(Duration::from_millis(100));

        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = cb.execute(|| async {
            let _ = gate_rx.await;
            Ok::<_, String>(())
        });
        let second_call = async {
            tokio::task::yield_now().await;
            let result = succeed(&cb).await;
            let _ = gate_tx.send(());
            result
        };

        let (trial_result, second_result) = tokio::join!(trial, second_call);
        assert!(trial_result.is_success());
        assert!(matches!(
            second_result.error(),
            Some(ExecutionError::CircuitOpen { .. })
        ));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_started_before_open_does_not_settle_trial() {
        let (cb, clock) = breaker(config(1, 100));
        let (stale_tx, stale_rx) = tokio::sync::oneshot::channel::<()>();
        let (open_tx, open_rx) = tokio::sync::oneshot::channel::<()>();
        let (trial_tx, trial_rx) = tokio::sync::oneshot::channel::<()>();

        // Admitted while closed, resolves only after the trial is in flight.
        let stale = cb.execute(|| async {
            let _ = stale_rx.await;
            Ok::<_, String>("stale")
        });
        let trial = async {
            let _ = open_rx.await;
            cb.execute(|| async {
                let _ = trial_rx.await;
                Ok::<_, String>("trial")
            })
            .await
        };
        let driver = async {
            tokio::task::yield_now().await;
            fail(&cb).await;
            assert_eq!(cb.state(), CircuitState::Open);
            clock.advance(Duration::from_millis(100));
            let _ = open_tx.send(());
            for _ in 0..10 {
                if cb.state() == CircuitState::HalfOpen {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert_eq!(cb.state(), CircuitState::HalfOpen);

            let _ = stale_tx.send(());
            for _ in 0..10 {
                if cb.metrics().last_success.is_some() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert!(cb.metrics().last_success.is_some());
            let half_open_state = cb.state();
            // The trial slot is still taken.
            let extra = succeed(&cb).await;

            let _ = trial_tx.send(());
            (half_open_state, extra)
        };

        let (stale_result, trial_result, (half_open_state, extra)) =
            tokio::join!(stale, trial, driver);
        assert_eq!(stale_result.into_result().unwrap(), "stale");
        assert_eq!(half_open_state, CircuitState::HalfOpen);
        assert!(matches!(
            extra.error(),
            Some(ExecutionError::CircuitOpen { .. })
        ));
        assert!(trial_result.is_success());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_started_before_open_failing_does_not_reopen() {
        let (cb, clock) = breaker(config(1, 100));
        let (stale_tx, stale_rx) = tokio::sync::oneshot::channel::<()>();
        let (open_tx, open_rx) = tokio::sync::oneshot::channel::<()>();
        let (trial_tx, trial_rx) = tokio::sync::oneshot::channel::<()>();

        let stale = cb.execute(|| async {
            let _ = stale_rx.await;
            Err::<(), _>("late failure".to_string())
        });
        let trial = async {
            let _ = open_rx.await;
            cb.execute(|| async {
                let _ = trial_rx.await;
                Ok::<_, String>(())
            })
            .await
        };
        let driver = async {
            tokio::task::yield_now().await;
            fail(&cb).await;
            clock.advance(Duration::from_millis(100));
            let _ = open_tx.send(());
            for _ in 0..10 {
                if cb.state() == CircuitState::HalfOpen {
                    break;
                }
                tokio::task::yield_now().await;
            }

            let failures_before = cb.metrics().last_failure;
            clock.advance(Duration::from_millis(1));
            let _ = stale_tx.send(());
            for _ in 0..10 {
                if cb.metrics().last_failure != failures_before {
                    break;
                }
                tokio::task::yield_now().await;
            }
            let after_stale = cb.state();
            let _ = trial_tx.send(());
            after_stale
        };

        let (stale_result, trial_result, after_stale) = tokio::join!(stale, trial, driver);
        assert!(stale_result.error().is_some());
        assert_eq!(after_stale, CircuitState::HalfOpen);
        assert!(trial_result.is_success());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_open_and_close() {
        let (cb, clock) = breaker(config(5, 500));
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().next_attempt, Some(clock.now_millis() + 500));
        assert!(fail(&cb).await.error().unwrap().is_rejection());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_success());
    }

    #[tokio::test]
    async fn test_reset() {
        let (cb, _) = breaker(config(2, 10_000));
        fail(&cb).await;
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        let metrics = cb.metrics();
        assert_eq!(metrics.failures, 0);
        assert_eq!(metrics.total_blocked, 0);
        assert_eq!(metrics.last_failure, None);
        assert!(cb.is_call_permitted());
    }

    #[tokio::test]
    async fn test_metrics_timestamps() {
        let (cb, clock) = breaker(config(5, 100));
        succeed(&cb).await;
        let success_at = clock.now_millis();
        clock.advance(Duration::from_millis(7));
        fail(&cb).await;

        let metrics = cb.metrics();
        assert_eq!(metrics.last_success, Some(success_at));
        assert_eq!(metrics.last_failure, Some(success_at + 7));
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.successes, 1);
        assert!((metrics.recent_failure_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreaker::builder("x").failure_threshold(0).build().is_err());
        assert!(CircuitBreaker::builder("x").success_threshold(0).build().is_err());
        assert!(CircuitBreaker::builder("x")
            .half_open_max_attempts(0)
            .build()
            .is_err());
        assert!(CircuitBreaker::builder("x")
            .monitoring_window(Some(Duration::ZERO))
            .build()
            .is_err());
        assert!(CircuitBreaker::builder("x")
            .monitoring_window(None)
            .build()
            .is_ok());
    }

    #[test]
    fn test_config_deserializes_camel_case() {
        let config: CircuitBreakerConfig = serde_json::from_str(
            r#"{"failureThreshold": 3, "resetTimeout": 30000, "halfOpenMaxAttempts": 2}"#,
        )
        .unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.reset_timeout, 30_000);
        assert_eq!(config.half_open_max_attempts, 2);
        assert_eq!(config.success_threshold, 1);
        assert_eq!(config.monitoring_window, Some(60_000));
    }

    #[tokio::test]
    async fn test_registry_shares_breakers_by_name() {
        let clock = MockClock::new(0);
        let registry =
            CircuitBreakerRegistry::new(config(1, 1_000), Arc::new(clock.clone())).unwrap();
        assert!(registry.is_empty());

        let a = registry.get_or_create("payments");
        let again = registry.get_or_create("payments");
        assert!(Arc::ptr_eq(&a, &again));

        fail(&a).await;
        assert_eq!(
            registry.get("payments").unwrap().state(),
            CircuitState::Open
        );
        assert_eq!(
            registry.get_or_create("profiles").state(),
            CircuitState::Closed
        );

        let names: Vec<_> = registry
            .all_metrics()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["payments", "profiles"]);

        registry.reset_all();
        assert_eq!(a.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_insert_custom_config() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::new(MockClock::new(0)))
                .unwrap();
        let breaker = registry.insert("kyc", config(1, 5)).unwrap();
        assert_eq!(breaker.config().failure_threshold, 1);
        assert!(registry.insert("bad", config(0, 5)).is_err());
        assert_eq!(registry.len(), 1);
    }
}
