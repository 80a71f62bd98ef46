//! Settings loader for retry and circuit breaker configuration
//!
//! ## Loading Strategy
//! Settings are layered, later layers overriding earlier ones:
//! 1. Built-in defaults
//! 2. A config file, if one is found (JSON or TOML by extension)
//! 3. Environment variable overrides
//!
//! The result is validated by converting it into [`RetryConfig`] and
//! [`CircuitBreakerConfig`].
//!
//! ## Environment Variables
//! - `STEADFAST_CONFIG`: explicit config file path (skips probing)
//! - `STEADFAST_RETRY_MAX_ATTEMPTS`: total attempts, including the first
//! - `STEADFAST_RETRY_BASE_DELAY_MS`: starting backoff unit
//! - `STEADFAST_RETRY_MAX_DELAY_MS`: cap on the exponential delay
//! - `STEADFAST_RETRY_MAX_JITTER_MS`: exclusive upper bound on jitter
//! - `STEADFAST_RETRY_CLAMP_JITTER`: re-clamp after jitter (true/false)
//! - `STEADFAST_BREAKER_FAILURE_THRESHOLD`: failures that open the circuit
//! - `STEADFAST_BREAKER_RESET_TIMEOUT_MS`: open-state cooldown
//!
//! ## File Locations
//! The loader probes, in order, `steadfast.toml`, `steadfast.json`,
//! `config/steadfast.toml` and `config/steadfast.json` in the current
//! working directory, then the same names next to the executable.
//!
//! ## Example
//! ```toml
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 200
//! max_delay_ms = 10000
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! reset_timeout_ms = 30000
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{CircuitBreakerConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT};
use crate::error::{ConfigError, ConfigResult};
use crate::retry::{
    RetryConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_MAX_JITTER,
};
use crate::utils::duration_millis;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "STEADFAST_CONFIG";

const CONFIG_FILE_NAMES: [&str; 4] =
    ["steadfast.toml", "steadfast.json", "config/steadfast.toml", "config/steadfast.json"];

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Retry executor settings
    pub retry: RetrySettings,
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerSettings,
}

/// Serializable form of [`RetryConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Starting backoff unit
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    /// Cap on the exponential delay
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Exclusive upper bound on jitter
    #[serde(rename = "max_jitter_ms", with = "duration_millis")]
    pub max_jitter: Duration,
    /// Re-clamp to `max_delay` after jitter
    pub clamp_jitter: bool,
}

impl Default for RetrySettings {
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

/// Serializable form of [`CircuitBreakerConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Open-state cooldown
    #[serde(rename = "reset_timeout_ms", with = "duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD, reset_timeout: DEFAULT_RESET_TIMEOUT }
    }
}

impl ResilienceSettings {
    /// Build a validated [`RetryConfig`]
    pub fn to_retry_config(&self) -> ConfigResult<RetryConfig> {
        let retry = &self.retry;
        RetryConfig::builder()
            .max_attempts(retry.max_attempts)
            .base_delay(retry.base_delay)
            .max_delay(retry.max_delay)
            .max_jitter(retry.max_jitter)
            .clamp_jitter(retry.clamp_jitter)
            .build()
    }

    /// Build a validated [`CircuitBreakerConfig`]
    pub fn to_breaker_config(&self) -> ConfigResult<CircuitBreakerConfig> {
        CircuitBreakerConfig::new(
            self.circuit_breaker.failure_threshold,
            self.circuit_breaker.reset_timeout,
        )
    }

    /// Check both sections
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_retry_config()?;
        self.to_breaker_config()?;
        Ok(())
    }
}

/// Load settings from defaults, an optional file, and the environment
///
/// # Errors
/// Returns [`ConfigError`] if `STEADFAST_CONFIG` names a missing file, a
/// file fails to parse, an override is malformed, or the result is invalid.
pub fn load() -> ConfigResult<ResilienceSettings> {
    let path = match std::env::var(CONFIG_PATH_ENV) {
        Ok(explicit) => Some(PathBuf::from(explicit)),
        Err(_) => probe_config_paths(),
    };

    let mut settings = match path {
        Some(path) => load_from_file(&path)?,
        None => {
            tracing::debug!("No config file found, using defaults");
            ResilienceSettings::default()
        }
    };

    apply_overrides(&mut settings, |name| std::env::var(name).ok())?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from defaults and environment overrides only
pub fn load_from_env() -> ConfigResult<ResilienceSettings> {
    let mut settings = ResilienceSettings::default();
    apply_overrides(&mut settings, |name| std::env::var(name).ok())?;
    settings.validate()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(settings)
}

/// Apply overrides from `lookup`, which maps a variable name to its value
///
/// Unset variables leave the current value alone.
pub fn apply_overrides<F>(settings: &mut ResilienceSettings, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = parse_var::<u32, _>(&lookup, "STEADFAST_RETRY_MAX_ATTEMPTS")? {
        settings.retry.max_attempts = v;
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "STEADFAST_RETRY_BASE_DELAY_MS")? {
        settings.retry.base_delay = Duration::from_millis(v);
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "STEADFAST_RETRY_MAX_DELAY_MS")? {
        settings.retry.max_delay = Duration::from_millis(v);
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "STEADFAST_RETRY_MAX_JITTER_MS")? {
        settings.retry.max_jitter = Duration::from_millis(v);
    }
    if let Some(v) = env_bool(&lookup, "STEADFAST_RETRY_CLAMP_JITTER")? {
        settings.retry.clamp_jitter = v;
    }
    if let Some(v) = parse_var::<u32, _>(&lookup, "STEADFAST_BREAKER_FAILURE_THRESHOLD")? {
        settings.circuit_breaker.failure_threshold = v;
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "STEADFAST_BREAKER_RESET_TIMEOUT_MS")? {
        settings.circuit_breaker.reset_timeout = Duration::from_millis(v);
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, name: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Env {
                var: name.to_string(),
                message: format!("invalid value {raw:?}: {e}"),
            })
        })
        .transpose()
}

fn env_bool<F>(lookup: &F, name: &str) -> ConfigResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Env {
                var: name.to_string(),
                message: format!("expected a boolean, got {raw:?}"),
            }),
        })
        .transpose()
}

/// Load settings from `path`; missing fields take their defaults
///
/// # Errors
/// Returns [`ConfigError::NotFound`] if the file does not exist, or a parse
/// error if its contents are malformed.
pub fn load_from_file(path: &Path) -> ConfigResult<ResilienceSettings> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(path)?;
    parse_settings(&contents, path)
}

/// Parse settings, choosing the format by `path`'s extension
///
/// Files without an extension are treated as JSON.
pub fn parse_settings(contents: &str, path: &Path) -> ConfigResult<ResilienceSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(ConfigError::invalid(format!("Unsupported config format: {other}"))),
    }
}

/// First config file found in `dir`, in probing order
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES.iter().map(|name| dir.join(name)).find(|candidate| candidate.is_file())
}

/// Probe the working directory, then the executable's directory
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok();
    let exe_dir = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf));

    let found = cwd.iter().chain(exe_dir.iter()).find_map(|dir| find_config_file(dir));
    if let Some(path) = &found {
        tracing::debug!(path = %path.display(), "Found config file");
    }
    found
}
