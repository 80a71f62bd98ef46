//! Error types for retry and circuit breaker operations
//!
//! Every failure path of the crate ends in exactly one [`ResilienceError`]
//! variant:
//!
//! | Variant | Produced by | Meaning |
//! |---------|-------------|---------|
//! | `Operation` | executor, breaker | The operation's own error, unchanged |
//! | `RetriesExhausted` | executor | Every allowed attempt failed |
//! | `CircuitOpen` | breaker | Call rejected without invoking the operation |
//! | `Cancelled` | executor | Caller cancelled the retry sequence |
//!
//! `RetriesExhausted` and `CircuitOpen` are deliberately separate so logs
//! can tell a dependency that fails per call from a breaker that is shedding
//! load. [`ResilienceError::kind`] returns a stable label for that purpose.
//!
//! Configuration problems use the separate [`ConfigError`].

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors returned by the retry executor and circuit breaker
///
/// Generic over the operation error `E` so the original error is preserved
/// rather than stringified.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The operation failed and the failure was passed through unchanged
    #[error(transparent)]
    Operation(E),

    /// All allowed attempts failed; `source` is the last operation error
    #[error("all {attempts} retry attempts exhausted: {source}")]
    RetriesExhausted {
        /// Total number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        #[source]
        source: E,
    },

    /// The circuit breaker rejected the call without invoking the operation
    #[error("circuit breaker is open, next attempt allowed in {retry_after:?}")]
    CircuitOpen {
        /// Instant at which the breaker will admit a trial call
        next_attempt_at: Instant,
        /// Time remaining until `next_attempt_at` when the call was rejected
        retry_after: Duration,
    },

    /// The retry sequence was cancelled by the caller
    #[error("retry sequence cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts made before cancellation was observed
        attempts: u32,
    },
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Stable classification of a [`ResilienceError`] for logs and telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation error passed through
    Operation,
    /// Retry attempts exhausted
    RetriesExhausted,
    /// Circuit breaker rejected the call
    CircuitOpen,
    /// Retry sequence cancelled
    Cancelled,
}

impl ErrorKind {
    /// Label suitable for a log field or metric tag
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Operation => "operation",
            Self::RetriesExhausted => "retries_exhausted",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Classify the error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Operation(_) => ErrorKind::Operation,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether the breaker rejected the call
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether every retry attempt failed
    pub const fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// Whether the sequence was cancelled
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The underlying operation error, if this error carries one
    pub const fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(source) | Self::RetriesExhausted { source, .. } => Some(source),
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Consume the error and return the underlying operation error
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(source) | Self::RetriesExhausted { source, .. } => Some(source),
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// Errors raised while building or loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value failed validation
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What was wrong
        message: String,
    },

    /// An environment variable was missing or malformed
    #[error("Environment variable {var}: {message}")]
    Env {
        /// Variable name
        var: String,
        /// What was wrong
        message: String,
    },

    /// No configuration file was found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Reading the configuration file failed
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed
    #[error("Invalid TOML format: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing failed
    #[error("Invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
