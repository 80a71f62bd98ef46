//! Retries routed through a circuit breaker
//!
//! Each attempt first asks the breaker for admission and only then invokes
//! the operation, so a rejected attempt never calls the operation closure:
//!
//! - an operation failure counts toward the breaker and is retried per the
//!   executor's policy;
//! - a `CircuitOpen` rejection ends the sequence immediately and is returned
//!   as-is;
//! - a failure that leaves the breaker open with cooldown remaining also ends
//!   the sequence with `CircuitOpen`, without notifying the observer or
//!   waiting out a backoff;
//! - when the last allowed attempt fails, the result is `RetriesExhausted`
//!   wrapping the operation's error.
//!
//! The error type is flattened so callers see `ResilienceError<E>`, never a
//! nested `ResilienceError<ResilienceError<E>>`.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::error::{ResilienceError, ResilienceResult};
use crate::retry::{RetryConfig, RetryExecutor, RetryObserver, RetryPolicy};

/// Retries only operation errors, deferring to the wrapped policy
///
/// Declines once the breaker is open and remembers the rejection so the
/// sequence can end with `CircuitOpen` instead of the operation error.
struct GuardedPolicy<'a, P, C: Clock, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    policy: &'a P,
    breaker: &'a CircuitBreaker<C>,
    tripped: Mutex<Option<ResilienceError<E>>>,
}

impl<'a, P, C: Clock, E> GuardedPolicy<'a, P, C, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn new(policy: &'a P, breaker: &'a CircuitBreaker<C>) -> Self {
        Self { policy, breaker, tripped: Mutex::new(None) }
    }

    fn take_tripped(&self) -> Option<ResilienceError<E>> {
        self.tripped.lock().take()
    }
}

impl<P, C, E> RetryPolicy<ResilienceError<E>> for GuardedPolicy<'_, P, C, E>
where
    P: RetryPolicy<E>,
    C: Clock,
    E: std::error::Error + Send + Sync + 'static,
{
    fn should_retry(&self, error: &ResilienceError<E>, attempt: u32) -> bool {
        let ResilienceError::Operation(inner) = error else {
            return false;
        };
        if !self.policy.should_retry(inner, attempt) {
            return false;
        }
        match self.breaker.open_rejection() {
            Some(rejection) => {
                debug!(attempt = attempt + 1, "circuit breaker opened, ending retry sequence");
                *self.tripped.lock() = Some(rejection);
                false
            }
            None => true,
        }
    }
}

struct GuardedObserver<'a, O>(&'a O);

impl<O, E> RetryObserver<ResilienceError<E>> for GuardedObserver<'_, O>
where
    O: RetryObserver<E>,
    E: std::error::Error + Send + Sync + 'static,
{
    fn on_retry(&self, error: &ResilienceError<E>, attempt: u32, delay: Duration) {
        if let ResilienceError::Operation(inner) = error {
            self.0.on_retry(inner, attempt, delay);
        }
    }
}

fn flatten<E>(error: ResilienceError<ResilienceError<E>>) -> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match error {
        ResilienceError::Operation(inner) => inner,
        ResilienceError::RetriesExhausted { attempts, source: ResilienceError::Operation(source) } => {
            ResilienceError::RetriesExhausted { attempts, source }
        }
        ResilienceError::RetriesExhausted { source, .. } => source,
        ResilienceError::CircuitOpen { next_attempt_at, retry_after } => {
            ResilienceError::CircuitOpen { next_attempt_at, retry_after }
        }
        ResilienceError::Cancelled { attempts } => ResilienceError::Cancelled { attempts },
    }
}

impl<P, O> RetryExecutor<P, O> {
    /// Retry `operation`, sending every attempt through `breaker`
    ///
    /// ```rust
    /// use std::time::Duration;
    ///
    /// use steadfast_resilience::{CircuitBreaker, RetryConfig, RetryExecutor};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let executor = RetryExecutor::new(RetryConfig::new(3, Duration::from_millis(10), Duration::from_secs(1))?);
    /// let breaker = CircuitBreaker::default();
    ///
    /// let value = executor
    ///     .execute_guarded(&breaker, || async { Ok::<_, std::io::Error>("ok") })
    ///     .await?;
    /// assert_eq!(value, "ok");
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all, fields(max_attempts = self.config().max_attempts()))]
    pub async fn execute_guarded<C, F, Fut, T, E>(
        &self,
        breaker: &CircuitBreaker<C>,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        C: Clock,
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_guarded(breaker, operation, None).await
    }

    /// Like [`execute_guarded`](Self::execute_guarded), but stops with
    /// [`ResilienceError::Cancelled`] once `token` is cancelled
    #[instrument(skip_all, fields(max_attempts = self.config().max_attempts()))]
    pub async fn execute_guarded_with_cancellation<C, F, Fut, T, E>(
        &self,
        breaker: &CircuitBreaker<C>,
        token: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        C: Clock,
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_guarded(breaker, operation, Some(token)).await
    }

    async fn run_guarded<C, F, Fut, T, E>(
        &self,
        breaker: &CircuitBreaker<C>,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> ResilienceResult<T, E>
    where
        C: Clock,
        P: RetryPolicy<E>,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let guarded =
            self.with_parts(GuardedPolicy::new(self.policy(), breaker), GuardedObserver(self.observer()));
        let operation = &mut operation;
        let attempt = move || {
            let admitted = breaker.admit::<E>().map(|permit| (permit, operation()));
            async move {
                let (permit, call) = admitted?;
                permit.complete(call.await)
            }
        };

        let result = match cancel {
            Some(token) => guarded.execute_with_cancellation(token, attempt).await,
            None => guarded.execute(attempt).await,
        };
        match (result, guarded.policy().take_tripped()) {
            (Err(ResilienceError::Operation(_)), Some(rejection)) => Err(rejection),
            (result, _) => result.map_err(flatten),
        }
    }
}

/// Retry `operation` under `config` through `breaker`, retrying every operation error
pub async fn retry_through_breaker<C, F, Fut, T, E>(
    config: RetryConfig,
    breaker: &CircuitBreaker<C>,
    operation: F,
) -> ResilienceResult<T, E>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    RetryExecutor::new(config).execute_guarded(breaker, operation).await
}
