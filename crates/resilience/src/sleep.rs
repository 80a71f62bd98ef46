//! Pluggable sleeping for backoff waits

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Suspends the calling task for a backoff delay
///
/// Implementations must only suspend the current task, never block the
/// thread.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns after yielding once
///
/// Clones share the recorded list.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Number of sleeps requested
    pub fn count(&self) -> usize {
        self.delays.lock().len()
    }

    /// Sum of all requested delays
    pub fn total(&self) -> Duration {
        self.delays.lock().iter().copied().fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[tokio::test]
    async fn test_recording_sleeper_records_without_waiting() {
        let sleeper = RecordingSleeper::new();
        let started = Instant::now();

        sleeper.sleep(Duration::from_secs(30)).await;
        sleeper.sleep(Duration::from_secs(60)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(30), Duration::from_secs(60)]);
        assert_eq!(sleeper.count(), 2);
        assert_eq!(sleeper.total(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_waits_on_timer() {
        let started = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(250)).await;
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
