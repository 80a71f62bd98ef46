//! Tracing setup and structured logging helpers

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::ResilienceError;
use crate::retry::RetryObserver;

/// Output format for [`init_tracing`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Install a global subscriber filtered by `RUST_LOG` (default `info`)
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init().is_ok()
        }
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init()
            .is_ok(),
    }
}

/// Stable label for a resilience error, suitable for metrics or logging
#[inline]
pub fn error_label<E>(error: &ResilienceError<E>) -> &'static str
where
    E: std::error::Error + Send + Sync + 'static,
{
    error.kind().as_str()
}

/// Log the outcome of a resilient call with structured fields
///
/// `operation` should be a stable identifier without sensitive data.
pub fn log_outcome<T, E>(operation: &str, elapsed: Duration, result: &Result<T, ResilienceError<E>>)
where
    E: std::error::Error + Send + Sync + 'static,
{
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(_) => info!(operation, duration_ms, "resilient_call_success"),
        Err(error) => warn!(
            operation,
            duration_ms,
            error_type = error_label(error),
            error = %error,
            "resilient_call_failure"
        ),
    }
}

/// Retry observer that emits one `warn` event per retry
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    /// Observer tagging events with `operation`
    pub fn new(operation: impl Into<String>) -> Self {
        Self { operation: operation.into() }
    }
}

impl<E: fmt::Display> RetryObserver<E> for TracingObserver {
    fn on_retry(&self, error: &E, attempt: u32, delay: Duration) {
        warn!(
            operation = %self.operation,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retrying operation"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::testing::TestError;

    #[test]
    fn test_error_labels() {
        let op: ResilienceError<TestError> = ResilienceError::Operation(TestError::fatal("x"));
        let open: ResilienceError<TestError> =
            ResilienceError::CircuitOpen { next_attempt_at: Instant::now(), retry_after: Duration::ZERO };
        let cancelled: ResilienceError<TestError> = ResilienceError::Cancelled { attempts: 2 };

        assert_eq!(error_label(&op), "operation");
        assert_eq!(error_label(&open), "circuit_open");
        assert_eq!(error_label(&cancelled), "cancelled");
    }

    #[test]
    fn test_init_tracing_only_installs_once() {
        let _ = init_tracing(LogFormat::Json);
        assert!(!init_tracing(LogFormat::Pretty));
    }

    #[test]
    fn test_tracing_observer_and_log_outcome_do_not_panic() {
        let observer = TracingObserver::new("fetch_profile");
        observer.on_retry(&TestError::transient("timeout"), 1, Duration::from_millis(100));

        let ok: Result<u32, ResilienceError<TestError>> = Ok(1);
        log_outcome("fetch_profile", Duration::from_millis(5), &ok);
        let err: Result<u32, ResilienceError<TestError>> =
            Err(ResilienceError::RetriesExhausted { attempts: 3, source: TestError::transient("t") });
        log_outcome("fetch_profile", Duration::from_millis(5), &err);
    }
}
