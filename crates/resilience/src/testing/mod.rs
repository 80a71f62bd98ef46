//! Test utilities for code built on this crate
//!
//! Provides a cloneable error type with a retryable flag and an operation
//! that fails a fixed number of times before succeeding. Combine with
//! [`crate::clock::MockClock`] and [`crate::sleep::RecordingSleeper`] for
//! fully deterministic tests.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Error produced by test operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TestError {
    /// Error message
    pub message: String,
    /// Whether a retry policy should retry this error
    pub retryable: bool,
}

impl TestError {
    /// A retryable error
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// A non-retryable error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

/// Operation that fails `failures` times, then succeeds with the call number
///
/// Call `n` (1-based) fails with `"attempt {n} failed"` while `n <= failures`
/// and returns `Ok(n)` afterwards. Clones share the call counter.
#[derive(Debug, Clone)]
pub struct FlakyOperation {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyOperation {
    /// Fail the first `failures` calls
    pub fn new(failures: u32) -> Self {
        Self { failures, calls: Arc::new(AtomicU32::new(0)) }
    }

    /// Never succeed
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Number of calls that have run so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Start one call; the counter is bumped when the future is first polled
    pub fn invoke(&self) -> impl Future<Output = Result<u32, TestError>> + Send + 'static {
        let calls = Arc::clone(&self.calls);
        let failures = self.failures;
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            if n <= failures {
                Err(TestError::transient(format!("attempt {n} failed")))
            } else {
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flaky_operation_fails_then_succeeds() {
        let flaky = FlakyOperation::new(2);

        assert_eq!(flaky.invoke().await, Err(TestError::transient("attempt 1 failed")));
        assert_eq!(flaky.invoke().await, Err(TestError::transient("attempt 2 failed")));
        assert_eq!(flaky.invoke().await, Ok(3));
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_counter() {
        let flaky = FlakyOperation::always_failing();
        let clone = flaky.clone();

        let _ = clone.invoke().await;
        let _ = flaky.invoke().await;
        assert_eq!(flaky.calls(), 2);
    }

    #[test]
    fn test_error_constructors() {
        assert!(TestError::transient("x").retryable);
        assert!(!TestError::fatal("x").retryable);
        assert_eq!(TestError::fatal("boom").to_string(), "boom");
    }
}
