//! Circuit breaker for protecting a failing dependency
//!
//! # States
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls are rejected without invoking the operation
//! - Half-Open: one trial call is let through to probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      failure_count >= failure_threshold
//! Open      → Half-Open: reset_timeout elapsed since opening (on the next call)
//! Half-Open → Closed:    trial call succeeds
//! Half-Open → Open:      trial call fails (fresh cooldown)
//! ```
//!
//! All mutable fields live behind a single mutex that is only held for the
//! synchronous bookkeeping before and after the operation, never across an
//! `.await`. The breaker itself never sleeps.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Default consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown before a trial call is allowed
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected
    Open,
    /// A single trial call is permitted
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit waits before admitting a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD, reset_timeout: DEFAULT_RESET_TIMEOUT }
    }
}

impl CircuitBreakerConfig {
    /// Create a validated configuration
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> ConfigResult<Self> {
        Self::builder().failure_threshold(failure_threshold).reset_timeout(reset_timeout).build()
    }

    /// Start a builder from the defaults
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Check invariants
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Builder seeded with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Cooldown before a trial call
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Attach a clock and build a breaker directly
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    /// Validate and build the configuration
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder carrying a custom clock; builds a [`CircuitBreaker`]
#[derive(Debug)]
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    /// Consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Cooldown before a trial call
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Validate and build the breaker
    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success or reset
    pub failure_count: u32,
    /// Every call to `execute`, admitted or not
    pub total_calls: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
    /// Admitted calls that succeeded
    pub successes: u64,
    /// Admitted calls that failed
    pub failures: u64,
    /// When an open breaker admits its next trial call
    pub next_attempt_at: Option<Instant>,
    /// When the state last changed
    pub last_state_change: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    /// Id of the trial call currently in flight, if any
    probe: Option<u64>,
    next_probe_id: u64,
    total_calls: u64,
    rejected_calls: u64,
    successes: u64,
    failures: u64,
    last_state_change: Instant,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe: None,
            next_probe_id: 0,
            total_calls: 0,
            rejected_calls: 0,
            successes: 0,
            failures: 0,
            last_state_change: now,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "circuit breaker state change");
            self.state = to;
            self.last_state_change = now;
        }
    }

    fn open(&mut self, now: Instant) {
        self.transition(CircuitState::Open, now);
        self.opened_at = Some(now);
        self.probe = None;
    }

    fn close(&mut self, now: Instant) {
        self.transition(CircuitState::Closed, now);
        self.failure_count = 0;
        self.opened_at = None;
        self.probe = None;
    }

    fn next_attempt_at(&self, timeout: Duration) -> Option<Instant> {
        self.opened_at.and_then(|opened| opened.checked_add(timeout))
    }
}

/// Rejection details produced when a call is not admitted
struct Rejected {
    next_attempt_at: Instant,
    retry_after: Duration,
}

impl Rejected {
    fn into_error<E>(self) -> ResilienceError<E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ResilienceError::CircuitOpen { next_attempt_at: self.next_attempt_at, retry_after: self.retry_after }
    }
}

/// Circuit breaker guarding a single dependency
///
/// Construct one per protected dependency and share it among callers;
/// clones share the same state.
///
/// ```rust
/// use std::time::Duration;
///
/// use steadfast_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(30))?)?;
///
/// let value = breaker.execute(|| async { Ok::<_, std::io::Error>(42) }).await?;
/// assert_eq!(value, 42);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # Ok(())
/// # }
/// ```
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Start a configuration builder; attach a clock with `.clock(..)`
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::from_parts(CircuitBreakerConfig::default(), SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: CircuitBreakerConfig, clock: C) -> Self {
        let now = clock.now();
        Self { config, inner: Arc::new(Mutex::new(BreakerState::new(now))), clock: Arc::new(clock) }
    }

    /// The configuration in use
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the breaker admits the call
    ///
    /// Returns the operation's value on success, `ResilienceError::Operation`
    /// with the unchanged error on failure, and `ResilienceError::CircuitOpen`
    /// without invoking the operation when the call is rejected.
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit()?;
        permit.complete(operation().await)
    }

    /// Claim admission for one call, or the `CircuitOpen` rejection
    ///
    /// The operation must only be started once this returns a permit.
    pub(crate) fn admit<E>(&self) -> ResilienceResult<CallPermit<'_, C>, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.try_acquire().map_err(|rejected| {
            debug!(retry_after_ms = rejected.retry_after.as_millis(), "circuit breaker rejecting call");
            rejected.into_error()
        })
    }

    /// Rejection an open breaker would hand the next caller right now
    ///
    /// `None` unless the breaker is `Open` with cooldown remaining.
    pub(crate) fn open_rejection<E>(&self) -> Option<ResilienceError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => self.cooldown_remaining(&inner, now).map(Rejected::into_error),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    fn cooldown_remaining(&self, inner: &BreakerState, now: Instant) -> Option<Rejected> {
        let opened_at = inner.opened_at.unwrap_or(now);
        let elapsed = now.saturating_duration_since(opened_at);
        (elapsed < self.config.reset_timeout).then(|| {
            let retry_after = self.config.reset_timeout - elapsed;
            Rejected { next_attempt_at: now.checked_add(retry_after).unwrap_or(now), retry_after }
        })
    }

    fn try_acquire(&self) -> Result<CallPermit<'_, C>, Rejected> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        let probe = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                if let Some(rejected) = self.cooldown_remaining(&inner, now) {
                    inner.rejected_calls += 1;
                    return Err(rejected);
                }
                inner.transition(CircuitState::HalfOpen, now);
                info!("circuit breaker half-open, admitting trial call");
                Some(Self::claim_probe(&mut inner))
            }
            CircuitState::HalfOpen => {
                if inner.probe.is_some() {
                    inner.rejected_calls += 1;
                    return Err(Rejected { next_attempt_at: now, retry_after: Duration::ZERO });
                }
                Some(Self::claim_probe(&mut inner))
            }
        };

        Ok(CallPermit { breaker: self, probe, finished: false })
    }

    fn claim_probe(inner: &mut BreakerState) -> u64 {
        let id = inner.next_probe_id;
        inner.next_probe_id = inner.next_probe_id.wrapping_add(1);
        inner.probe = Some(id);
        id
    }

    fn on_success(&self, probe: Option<u64>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.successes += 1;

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if probe.is_some() && inner.probe == probe => {
                inner.close(now);
                info!("circuit breaker closed after successful trial call");
            }
            // A call admitted before the circuit opened; it does not decide recovery.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: Option<u64>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failures += 1;
        inner.failure_count = inner.failure_count.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.open(now);
                    warn!(
                        failure_count = inner.failure_count,
                        reset_timeout_ms = self.config.reset_timeout.as_millis(),
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if probe.is_some() && inner.probe == probe => {
                inner.open(now);
                warn!(failure_count = inner.failure_count, "trial call failed, circuit breaker re-opened");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self, probe: u64) {
        let mut inner = self.inner.lock();
        if inner.probe == Some(probe) {
            debug!("trial call abandoned, releasing half-open slot");
            inner.probe = None;
        }
    }

    /// Current state; no side effects
    ///
    /// An open breaker whose cooldown has elapsed still reports `Open` until
    /// the next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failures since the last success or reset
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Snapshot of counters and state
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            successes: inner.successes,
            failures: inner.failures,
            next_attempt_at: inner.next_attempt_at(self.config.reset_timeout),
            last_state_change: inner.last_state_change,
        }
    }

    /// Force the breaker closed and clear the failure count
    ///
    /// Idempotent. Call counters are kept.
    pub fn reset(&self) {
        let now = self.clock.now();
        self.inner.lock().close(now);
        info!("circuit breaker manually reset to closed state");
    }
}

/// Admission for one call; records the outcome exactly once
///
/// Dropping an unfinished trial permit (the caller's future was cancelled)
/// frees the half-open slot so the next caller can probe.
pub(crate) struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    probe: Option<u64>,
    finished: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    /// Record the admitted call's outcome and map its error
    pub(crate) fn complete<T, E>(mut self, result: Result<T, E>) -> ResilienceResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                warn!(error = %error, "circuit breaker: operation failed");
                self.record_failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }

    fn record_success(&mut self) {
        self.finished = true;
        self.breaker.on_success(self.probe);
    }

    fn record_failure(&mut self) {
        self.finished = true;
        self.breaker.on_failure(self.probe);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if let (false, Some(probe)) = (self.finished, self.probe) {
            self.breaker.release_probe(probe);
        }
    }
}
