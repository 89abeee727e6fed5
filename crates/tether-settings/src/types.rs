//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the fields it changes.

use serde::{Deserialize, Serialize};
use tether_core::retry::{
    BackoffKind, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
    DEFAULT_RATE_LIMIT_MIN_DELAY_MS,
};

use crate::errors::{Result, SettingsError};

/// Root settings object for the resilient client.
///
/// # JSON Format
///
/// ```json
/// {
///   "retry": { "maxAttempts": 5, "backoffKind": "linear" },
///   "circuit": { "maxFailures": 10 },
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceSettings {
    /// Retry policy for outbound calls.
    pub retry: RetrySettings,
    /// Circuit breaker thresholds, shared by every provider.
    pub circuit: CircuitSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl ResilienceSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "retry.maxAttempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "retry.baseDelayMs ({}) exceeds retry.maxDelayMs ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.circuit.max_failures == 0 {
            return Err(SettingsError::InvalidValue(
                "circuit.maxFailures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Retry configuration for API calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Maximum attempts per logical call, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Delay growth strategy.
    pub backoff_kind: BackoffKind,
    /// Scale each delay by a random factor in `[0.75, 1.25]`.
    pub jitter_enabled: bool,
    /// Minimum delay before retrying a rate-limited call, in milliseconds.
    pub rate_limit_min_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_kind: BackoffKind::Exponential,
            jitter_enabled: true,
            rate_limit_min_delay_ms: DEFAULT_RATE_LIMIT_MIN_DELAY_MS,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitSettings {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Time the circuit stays open before a trial call, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (`RUST_LOG` still takes precedence).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
