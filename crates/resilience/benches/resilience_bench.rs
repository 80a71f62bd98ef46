//! Resilience benchmarks
//!
//! Covers the circuit breaker's admission paths and state transitions, the
//! retry executor's outcomes, and backoff/jitter computation.
//!
//! Run with: `cargo bench --bench resilience_bench -p steadfast-resilience`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use steadfast_resilience::testing::{FlakyOperation, TestError};
use steadfast_resilience::{
    delay_for_attempt, exponential_delay, CircuitBreaker, FixedJitter, JitterSource, MockClock,
    NoJitter, RetryConfig, RetryExecutor, SeededJitter, ThreadRngJitter, TokioSleeper,
};
use tokio::runtime::Builder as RuntimeBuilder;

fn build_runtime() -> tokio::runtime::Runtime {
    RuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime should build for benchmarks")
}

fn zero_delay_config(max_attempts: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::ZERO)
        .no_jitter()
        .build()
        .expect("retry config should build for benchmarks")
}

// ============================================================================
// Circuit Breaker Benchmarks
// ============================================================================

fn bench_circuit_breaker_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_paths");
    let runtime = build_runtime();

    group.bench_function("execute_success", |b| {
        let breaker = CircuitBreaker::default();
        b.to_async(&runtime).iter(|| async {
            let result = breaker.execute(|| async { Ok::<_, TestError>(()) }).await;
            if let Err(err) = result {
                panic!("circuit breaker success path failed: {err}");
            }
        });
    });

    group.bench_function("fail_to_open", |b| {
        b.to_async(&runtime).iter(|| async {
            let breaker = CircuitBreaker::builder()
                .failure_threshold(5)
                .reset_timeout(Duration::from_secs(30))
                .clock(MockClock::new())
                .build()
                .expect("circuit breaker should build with benchmark configuration");

            for _ in 0..5 {
                let result = breaker
                    .execute(|| async { Err::<(), _>(TestError::transient("benchmark failure")) })
                    .await;
                let _result = black_box(result);
            }
            black_box(breaker.state());
        });
    });

    group.bench_function("open_short_circuit", |b| {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(60))
            .clock(MockClock::new())
            .build()
            .expect("circuit breaker should build for short-circuit");
        runtime.block_on(async {
            let _ = breaker.execute(|| async { Err::<(), _>(TestError::transient("trip")) }).await;
        });

        b.to_async(&runtime).iter(|| async {
            let result = breaker.execute(|| async { Ok::<_, TestError>(()) }).await;
            let _result = black_box(result);
        });
    });

    group.bench_function("open_half_open_recover", |b| {
        b.to_async(&runtime).iter(|| async {
            let clock = MockClock::new();
            let breaker = CircuitBreaker::builder()
                .failure_threshold(3)
                .reset_timeout(Duration::from_millis(10))
                .clock(clock.clone())
                .build()
                .expect("circuit breaker should build with mock clock");

            for _ in 0..3 {
                let _ = breaker
                    .execute(|| async { Err::<(), _>(TestError::transient("state transition")) })
                    .await;
            }
            clock.advance(Duration::from_millis(10));
            let _ = breaker.execute(|| async { Ok::<_, TestError>(()) }).await;

            black_box(breaker.state());
        });
    });

    group.finish();
}

// ============================================================================
// Retry Benchmarks
// ============================================================================

fn bench_retry_executor_outcomes(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_executor_outcomes");
    let runtime = build_runtime();

    group.bench_function("immediate_success", |b| {
        let executor = RetryExecutor::new(zero_delay_config(3));
        b.to_async(&runtime).iter(|| async {
            let result = executor.execute(|| async { Ok::<_, TestError>(()) }).await;
            if let Err(err) = result {
                panic!("retry immediate success failed: {err:?}");
            }
        });
    });

    group.bench_function("transient_failures_then_success", |b| {
        let executor =
            RetryExecutor::new(zero_delay_config(5)).with_jitter(NoJitter).with_sleeper(TokioSleeper);
        b.to_async(&runtime).iter(|| async {
            let flaky = FlakyOperation::new(3);
            let result = executor.execute(|| flaky.invoke()).await;
            if let Err(err) = result {
                panic!("retry transient failure path exhausted: {err:?}");
            }
        });
    });

    group.bench_function("always_fail", |b| {
        let executor =
            RetryExecutor::new(zero_delay_config(4)).with_jitter(NoJitter).with_sleeper(TokioSleeper);
        b.to_async(&runtime).iter(|| async {
            let flaky = FlakyOperation::always_failing();
            let result = executor.execute(|| flaky.invoke()).await;
            let _result = black_box(result);
        });
    });

    group.finish();
}

fn bench_backoff_calculations(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_calculations");
    let attempts = [0u32, 1, 5, 10, 40];
    let base = Duration::from_millis(100);
    let max = Duration::from_secs(30);

    group.bench_function("exponential_delay", |b| {
        b.iter(|| {
            for attempt in attempts {
                black_box(exponential_delay(black_box(attempt), base, max));
            }
        });
    });

    let config = RetryConfig::builder().base_delay(base).max_delay(max).build().expect("valid config");
    let jitters: [(&str, Box<dyn JitterSource>); 4] = [
        ("none", Box::new(NoJitter)),
        ("fixed", Box::new(FixedJitter(Duration::from_millis(5)))),
        ("seeded", Box::new(SeededJitter::new(42))),
        ("thread_rng", Box::new(ThreadRngJitter)),
    ];

    for (name, jitter) in &jitters {
        group.bench_with_input(BenchmarkId::new("delay_for_attempt", name), jitter, |b, jitter| {
            b.iter(|| {
                for attempt in attempts {
                    black_box(delay_for_attempt(attempt, &config, &**jitter));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    resilience,
    bench_circuit_breaker_paths,
    bench_retry_executor_outcomes,
    bench_backoff_calculations
);
criterion_main!(resilience);
