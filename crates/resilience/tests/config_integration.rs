//! Integration tests for settings loading
//!
//! Covers file loading in both formats, environment layering through
//! `load()`, and building working components from loaded settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use steadfast_resilience::config::{self, apply_overrides, load_from_file, CONFIG_PATH_ENV};
use steadfast_resilience::testing::FlakyOperation;
use steadfast_resilience::{
    CircuitBreaker, CircuitState, ConfigError, NoJitter, RecordingSleeper, ResilienceSettings,
    RetryExecutor,
};

fn write_config(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Validates that a TOML file drives both components.
///
/// # Test Steps
/// 1. Write a TOML file with retry and breaker sections
/// 2. Load it and convert into runtime configs
/// 3. Run a guarded retry with the resulting executor and breaker
/// 4. Verify the configured delays and threshold took effect
#[tokio::test]
async fn test_toml_settings_build_working_components() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(
        dir.path(),
        "steadfast.toml",
        r#"
[retry]
max_attempts = 4
base_delay_ms = 25
max_delay_ms = 60

[circuit_breaker]
failure_threshold = 2
reset_timeout_ms = 1000
"#,
    )
    .expect("config file written");

    let settings = load_from_file(&path).expect("settings load");
    let sleeper = RecordingSleeper::new();
    let executor = RetryExecutor::new(settings.to_retry_config().expect("valid retry config"))
        .with_jitter(NoJitter)
        .with_sleeper(sleeper.clone());
    let breaker = CircuitBreaker::new(settings.to_breaker_config().expect("valid breaker config"))
        .expect("valid breaker");

    let flaky = FlakyOperation::new(1);
    let value = executor.execute_guarded(&breaker, || flaky.invoke()).await.expect("recovers");
    assert_eq!(value, 2);

    let always = FlakyOperation::always_failing();
    let err = executor.execute_guarded(&breaker, || always.invoke()).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(always.calls(), 2);

    assert_eq!(sleeper.delays(), vec![Duration::from_millis(25), Duration::from_millis(25)]);
}

#[test]
fn test_json_settings_with_missing_sections_use_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(dir.path(), "steadfast.json", r#"{"retry":{"max_jitter_ms":0}}"#)
        .expect("config file written");

    let settings = load_from_file(&path).expect("settings load");
    let defaults = ResilienceSettings::default();

    assert_eq!(settings.retry.max_jitter, Duration::ZERO);
    assert_eq!(settings.retry.max_attempts, defaults.retry.max_attempts);
    assert_eq!(settings.circuit_breaker, defaults.circuit_breaker);
}

#[test]
fn test_invalid_file_values_rejected_on_conversion() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(dir.path(), "steadfast.toml", "[retry]\nmax_attempts = 0\n")
        .expect("config file written");

    let settings = load_from_file(&path).expect("settings load");
    assert!(matches!(settings.to_retry_config(), Err(ConfigError::Invalid { .. })));
}

/// Validates overrides layered over file values.
#[test]
fn test_overrides_win_over_file_values() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_config(
        dir.path(),
        "steadfast.toml",
        "[circuit_breaker]\nfailure_threshold = 9\nreset_timeout_ms = 100\n",
    )
    .expect("config file written");

    let mut settings = load_from_file(&path).expect("settings load");
    apply_overrides(&mut settings, |name| {
        (name == "STEADFAST_BREAKER_FAILURE_THRESHOLD").then(|| "4".to_string())
    })
    .expect("override applies");

    assert_eq!(settings.circuit_breaker.failure_threshold, 4);
    assert_eq!(settings.circuit_breaker.reset_timeout, Duration::from_millis(100));
}

/// Validates the full `load()` path with an explicit config file and an env override.
///
/// The only test in this binary that touches process environment.
#[test]
fn test_load_layers_file_and_environment() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path =
        write_config(dir.path(), "custom.toml", "[retry]\nmax_attempts = 6\nbase_delay_ms = 10\n")
            .expect("config file written");

    std::env::set_var(CONFIG_PATH_ENV, &path);
    std::env::set_var("STEADFAST_RETRY_BASE_DELAY_MS", "40");
    let loaded = config::load();
    std::env::remove_var(CONFIG_PATH_ENV);
    std::env::remove_var("STEADFAST_RETRY_BASE_DELAY_MS");

    let settings = loaded.expect("layered load");
    assert_eq!(settings.retry.max_attempts, 6);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(40));
}
