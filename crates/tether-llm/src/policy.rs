//! Backoff policy.
//!
//! A [`RetryPolicy`] turns an attempt number into a delay. The generic
//! backoff comes from [`tether_core::retry::calculate_backoff`]; upstream
//! hints can only widen it:
//!
//! - a `Retry-After` value reported with the failure
//! - the rate-limit floor, for [`ErrorCategory::RateLimit`] failures

use std::time::Duration;

use tether_core::retry::{BackoffKind, calculate_backoff};
use tether_core::{ClassifiedError, ErrorCategory};
use tether_settings::RetrySettings;

/// Retry policy for one logical call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first. `0` acts as `1`.
    pub max_attempts: u32,
    /// Base delay fed to the backoff formula.
    pub base_delay: Duration,
    /// Clamp for the generic backoff delay.
    pub max_delay: Duration,
    /// Delay growth strategy.
    pub backoff: BackoffKind,
    /// Whether each delay is scaled by a random factor in `[0.75, 1.25]`.
    pub jitter: bool,
    /// Minimum delay after a rate-limit failure.
    pub rate_limit_min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff: settings.backoff_kind,
            jitter: settings.jitter_enabled,
            rate_limit_min_delay: Duration::from_millis(settings.rate_limit_min_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            backoff: BackoffKind::Fixed,
            jitter: false,
            rate_limit_min_delay: Duration::ZERO,
        }
    }

    /// Set the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempt limit, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Generic backoff after the one-based `attempt` failed.
    ///
    /// `jitter_sample` is ignored when jitter is disabled.
    pub fn backoff(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let factor = if self.jitter { jitter_sample } else { 1.0 };
        calculate_backoff(self.backoff, attempt, self.base_delay, self.max_delay, factor)
    }

    /// Delay before retrying after `error` failed the one-based `attempt`.
    pub fn delay_for(&self, attempt: u32, error: &ClassifiedError, jitter_sample: f64) -> Duration {
        let mut delay = self.backoff(attempt, jitter_sample);
        if let Some(retry_after) = error.retry_after() {
            delay = delay.max(retry_after);
        }
        if error.category() == ErrorCategory::RateLimit {
            delay = delay.max(self.rate_limit_min_delay);
        }
        delay
    }
}
