//! Exponential backoff with injectable jitter
//!
//! The delay before retry attempt `n` (0-based index of the attempt that just
//! failed) is
//!
//! ```text
//! capped  = min(base_delay * 2^n, max_delay)
//! delay   = capped + jitter,   jitter in [0, max_jitter)
//! ```
//!
//! Jitter is added after the clamp, so the effective wait may exceed
//! `max_delay` by less than `max_jitter`. Setting
//! [`RetryConfigBuilder::clamp_jitter`](crate::RetryConfigBuilder::clamp_jitter)
//! re-applies the clamp after jitter.
//!
//! Randomness comes from a [`JitterSource`] rather than a global RNG so tests
//! can pin the exact delay.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::retry::RetryConfig;

/// Exponential delay for `attempt`, clamped to `max_delay`, without jitter
///
/// Non-decreasing in `attempt` and never greater than `max_delay`.
pub fn exponential_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let mut delay = base_delay;
    // Bounded by the cap, not by `attempt`.
    for _ in 0..attempt {
        if delay.is_zero() || delay >= max_delay {
            break;
        }
        delay = delay.saturating_mul(2);
    }
    delay.min(max_delay)
}

/// Full backoff delay for `attempt` under `config`, including jitter
pub fn delay_for_attempt(attempt: u32, config: &RetryConfig, jitter: &dyn JitterSource) -> Duration {
    let capped = exponential_delay(attempt, config.base_delay(), config.max_delay());
    let jittered = capped.saturating_add(jitter.sample(config.max_jitter()));

    if config.clamp_jitter() {
        jittered.min(config.max_delay())
    } else {
        jittered
    }
}

/// Source of random jitter
///
/// `sample(max)` must return a duration in `[0, max)`, or zero when `max` is
/// zero.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Draw a jitter value below `max`
    fn sample(&self, max: Duration) -> Duration;
}

fn bound_nanos(max: Duration) -> u64 {
    u64::try_from(max.as_nanos()).unwrap_or(u64::MAX)
}

/// Jitter drawn from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self, max: Duration) -> Duration {
        let bound = bound_nanos(max);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
    }
}

/// Deterministic jitter from a seeded [`StdRng`]
///
/// Two sources built from the same seed produce the same sequence.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Create a source seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self, max: Duration) -> Duration {
        let bound = bound_nanos(max);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.rng.lock().gen_range(0..bound))
    }
}

/// Always returns zero jitter
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Returns the same jitter every time, kept strictly below `max`
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn sample(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        self.0.min(max.saturating_sub(Duration::from_nanos(1)))
    }
}
