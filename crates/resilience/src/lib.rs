//! Retry with exponential backoff and circuit breaking for async operations.
//!
//! # Components
//!
//! - [`backoff`]: delay computation `min(base * 2^n, max) + jitter`
//! - [`retry`]: [`RetryExecutor`], which re-invokes a failing operation
//! - [`circuit_breaker`]: [`CircuitBreaker`], which stops calling a dependency
//!   after repeated failures and probes it again after a cooldown
//! - [`guarded`]: retries where every attempt passes through a breaker
//! - [`config`]: file and environment loading for both components
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use steadfast_resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryExecutor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = RetryExecutor::new(
//!     RetryConfig::builder()
//!         .max_attempts(5)
//!         .base_delay(Duration::from_millis(100))
//!         .max_delay(Duration::from_secs(5))
//!         .build()?,
//! );
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(30))?)?;
//!
//! let body = executor
//!     .execute_guarded(&breaker, || async { Ok::<_, std::io::Error>("pong") })
//!     .await?;
//! assert_eq!(body, "pong");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod guarded;
pub mod logging;
pub mod retry;
pub mod sleep;
pub mod testing;
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use backoff::{
    delay_for_attempt, exponential_delay, FixedJitter, JitterSource, NoJitter, SeededJitter,
    ThreadRngJitter,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{CircuitBreakerSettings, ResilienceSettings, RetrySettings};
pub use error::{ConfigError, ConfigResult, ErrorKind, ResilienceError, ResilienceResult};
pub use guarded::retry_through_breaker;
pub use logging::{init_tracing, LogFormat, TracingObserver};
pub use retry::policies::{AlwaysRetry, NeverRetry};
pub use retry::{
    retry, retry_with_policy, NoopObserver, RetryConfig, RetryConfigBuilder, RetryExecutor,
    RetryObserver, RetryOutcome, RetryPolicy, RetryState,
};
pub use sleep::{RecordingSleeper, Sleeper, TokioSleeper};
