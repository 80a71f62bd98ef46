//! Retry executor with exponential backoff
//!
//! [`RetryExecutor`] invokes a fallible async operation up to
//! `max_attempts` times, sleeping between attempts for the delay computed by
//! [`crate::backoff`]. Each invocation walks the following state machine:
//!
//! ```text
//! ATTEMPTING --ok--------------------------------> SUCCEEDED
//! ATTEMPTING --err, last attempt-----------------> EXHAUSTED  (RetriesExhausted)
//! ATTEMPTING --err, policy declines--------------> ABORTED    (Operation, unchanged)
//! ATTEMPTING --err, retry--> WAITING --delay--> ATTEMPTING
//! WAITING    --cancelled-------------------------> ABORTED    (Cancelled)
//! ```
//!
//! Attempts within one invocation are strictly sequential. Separate
//! invocations share nothing, so one executor can serve many concurrent
//! callers.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backoff::{delay_for_attempt, JitterSource, ThreadRngJitter};
use crate::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::sleep::{Sleeper, TokioSleeper};

/// Default total attempts, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default starting backoff unit
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default cap on the exponential delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default exclusive upper bound on jitter
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Immutable retry configuration
///
/// `max_delay >= base_delay` is not enforced; when it does not hold every
/// delay is clamped to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
    clamp_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            clamp_jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a validated configuration with default jitter
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> ConfigResult<Self> {
        Self::builder().max_attempts(max_attempts).base_delay(base_delay).max_delay(max_delay).build()
    }

    /// Start a builder from the defaults
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Check invariants
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        Ok(())
    }

    /// Total attempts, including the first
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Starting backoff unit
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap on the exponential delay
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Exclusive upper bound on jitter
    pub const fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Whether the delay is clamped again after jitter is added
    pub const fn clamp_jitter(&self) -> bool {
        self.clamp_jitter
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Builder seeded with [`RetryConfig::default`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts, including the first; must be at least 1
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Starting backoff unit
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Cap on the exponential delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Exclusive upper bound on jitter
    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.config.max_jitter = jitter;
        self
    }

    /// Disable jitter entirely
    pub fn no_jitter(self) -> Self {
        self.max_jitter(Duration::ZERO)
    }

    /// Re-clamp to `max_delay` after jitter is added
    pub fn clamp_jitter(mut self, clamp: bool) -> Self {
        self.config.clamp_jitter = clamp;
        self
    }

    /// Validate and build
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// States of one retry sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Operation is being invoked
    Attempting,
    /// Sleeping before the next attempt
    Waiting,
    /// Operation returned a value
    Succeeded,
    /// Every allowed attempt failed
    Exhausted,
    /// Stopped early by policy or cancellation
    Aborted,
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Attempting => "ATTEMPTING",
            Self::Waiting => "WAITING",
            Self::Succeeded => "SUCCEEDED",
            Self::Exhausted => "EXHAUSTED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}

/// Decides whether a failed attempt should be retried
///
/// `attempt` is the 0-based index of the attempt that failed. Closures of
/// the form `|err: &MyError, attempt: u32| -> bool` implement this trait.
pub trait RetryPolicy<E> {
    /// Return `false` to stop retrying and surface `error` unchanged
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

impl<E, F> RetryPolicy<E> for F
where
    F: Fn(&E, u32) -> bool,
{
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        self(error, attempt)
    }
}

/// Observes retries, typically for logging
///
/// Called once per retry with the error, the 1-based number of the attempt
/// that failed, and the delay about to be slept. A panic inside the observer
/// is caught and does not affect the retry sequence. Closures of the form
/// `|err: &MyError, attempt: u32, delay: Duration|` implement this trait.
pub trait RetryObserver<E> {
    /// Called before each backoff wait
    fn on_retry(&self, error: &E, attempt: u32, delay: Duration);
}

impl<E, F> RetryObserver<E> for F
where
    F: Fn(&E, u32, Duration),
{
    fn on_retry(&self, error: &E, attempt: u32, delay: Duration) {
        self(error, attempt, delay);
    }
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<E> RetryObserver<E> for NoopObserver {
    fn on_retry(&self, _error: &E, _attempt: u32, _delay: Duration) {}
}

/// Pre-defined retry policies
pub mod policies {
    use super::RetryPolicy;

    /// Retries every error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            true
        }
    }

    /// Never retries; the first failure is returned unchanged
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            false
        }
    }
}

use policies::AlwaysRetry;

/// Result of a retry sequence with summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Final result
    pub result: ResilienceResult<T, E>,
    /// Number of times the operation was invoked
    pub attempts: u32,
    /// Sum of completed backoff waits
    pub total_delay: Duration,
    /// Terminal state of the sequence
    pub final_state: RetryState,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Discard the statistics
    pub fn into_result(self) -> ResilienceResult<T, E> {
        self.result
    }

    /// Whether the sequence ended in success
    pub const fn succeeded(&self) -> bool {
        matches!(self.final_state, RetryState::Succeeded)
    }
}

/// Runs an operation with retries and exponential backoff
///
/// Cheap to share: the jitter source and sleeper are reference counted and
/// no per-invocation state is stored on the executor.
pub struct RetryExecutor<P = AlwaysRetry, O = NoopObserver> {
    config: RetryConfig,
    policy: P,
    observer: O,
    jitter: Arc<dyn JitterSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl<P: fmt::Debug, O: fmt::Debug> fmt::Debug for RetryExecutor<P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("observer", &self.observer)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl RetryExecutor {
    /// Executor that retries every error, with thread-RNG jitter and tokio sleeps
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            policy: AlwaysRetry,
            observer: NoopObserver,
            jitter: Arc::new(ThreadRngJitter),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl<P, O> RetryExecutor<P, O> {
    /// Replace the retry policy
    pub fn with_policy<P2>(self, policy: P2) -> RetryExecutor<P2, O> {
        RetryExecutor {
            config: self.config,
            policy,
            observer: self.observer,
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }

    /// Replace the retry observer
    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutor<P, O2> {
        RetryExecutor {
            config: self.config,
            policy: self.policy,
            observer,
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }

    /// Replace the jitter source
    #[must_use]
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// Replace the sleeper
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// The configuration in use
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay that would be slept after the attempt with 0-based index `attempt` fails
    pub fn delay_for(&self, attempt: u32) -> Duration {
        delay_for_attempt(attempt, &self.config, self.jitter.as_ref())
    }

    pub(crate) const fn policy(&self) -> &P {
        &self.policy
    }

    pub(crate) const fn observer(&self) -> &O {
        &self.observer
    }

    /// Share this executor's config, jitter and sleeper under another policy and observer
    pub(crate) fn with_parts<P2, O2>(&self, policy: P2, observer: O2) -> RetryExecutor<P2, O2> {
        RetryExecutor {
            config: self.config.clone(),
            policy,
            observer,
            jitter: Arc::clone(&self.jitter),
            sleeper: Arc::clone(&self.sleeper),
        }
    }

    /// Run `operation` until it succeeds, the policy declines, or attempts run out
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(operation, None).await.into_result()
    }

    /// Like [`execute`](Self::execute), but returns attempt statistics as well
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), but stops with
    /// [`ResilienceError::Cancelled`] once `token` is cancelled
    ///
    /// Cancellation is observed before every attempt and interrupts a pending
    /// backoff wait. An attempt already in progress runs to completion.
    #[instrument(skip(self, token, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_cancellation<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(operation, Some(token)).await.into_result()
    }

    async fn run<F, Fut, T, E>(
        &self,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt: u32 = 0;
        let mut total_delay = Duration::ZERO;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!(attempts = attempt, "retry sequence cancelled before attempt");
                return RetryOutcome {
                    result: Err(ResilienceError::Cancelled { attempts: attempt }),
                    attempts: attempt,
                    total_delay,
                    final_state: RetryState::Aborted,
                };
            }

            let attempts = attempt + 1;
            debug!(attempt = attempts, max_attempts, state = %RetryState::Attempting, "executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts, "operation succeeded after {} retries", attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        total_delay,
                        final_state: RetryState::Succeeded,
                    };
                }
                Err(error) => error,
            };

            if attempts >= max_attempts {
                warn!(attempts, error = %error, "all retry attempts exhausted");
                return RetryOutcome {
                    result: Err(ResilienceError::RetriesExhausted { attempts, source: error }),
                    attempts,
                    total_delay,
                    final_state: RetryState::Exhausted,
                };
            }

            if !self.policy.should_retry(&error, attempt) {
                debug!(attempt = attempts, error = %error, "retry policy declined, aborting");
                return RetryOutcome {
                    result: Err(ResilienceError::Operation(error)),
                    attempts,
                    total_delay,
                    final_state: RetryState::Aborted,
                };
            }

            let delay = self.delay_for(attempt);
            self.notify(&error, attempts, delay);
            warn!(
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                state = %RetryState::Waiting,
                "operation failed, retrying after backoff"
            );

            if !self.wait(delay, cancel).await {
                debug!(attempts, "retry sequence cancelled during backoff");
                return RetryOutcome {
                    result: Err(ResilienceError::Cancelled { attempts }),
                    attempts,
                    total_delay,
                    final_state: RetryState::Aborted,
                };
            }

            total_delay = total_delay.saturating_add(delay);
            attempt = attempts;
        }
    }

    fn notify<E>(&self, error: &E, attempt: u32, delay: Duration)
    where
        O: RetryObserver<E>,
    {
        let observed =
            panic::catch_unwind(AssertUnwindSafe(|| self.observer.on_retry(error, attempt, delay)));
        if observed.is_err() {
            warn!(attempt, "retry observer panicked, continuing retry sequence");
        }
    }

    /// Returns `false` when cancelled before the delay elapsed.
    async fn wait(&self, delay: Duration, cancel: Option<&CancellationToken>) -> bool {
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => false,
                    () = self.sleeper.sleep(delay) => true,
                }
            }
            None => {
                self.sleeper.sleep(delay).await;
                true
            }
        }
    }
}

/// Retry `operation` under `config`, retrying every error
pub async fn retry<F, Fut, T, E>(config: RetryConfig, operation: F) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    RetryExecutor::new(config).execute(operation).await
}

/// Retry `operation` under `config`, consulting `policy` after each failure
pub async fn retry_with_policy<F, Fut, T, E, P>(
    config: RetryConfig,
    policy: P,
    operation: F,
) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: RetryPolicy<E>,
    E: std::error::Error + Send + Sync + 'static,
{
    RetryExecutor::new(config).with_policy(policy).execute(operation).await
}
