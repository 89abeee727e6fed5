//! Backoff calculation.
//!
//! Portable, sync-only building blocks for retry timing. The async retry
//! loop lives in `tether-llm`; this module holds the math:
//!
//! - [`BackoffKind`]: fixed, linear or exponential growth
//! - [`raw_backoff`]: the un-jittered, un-clamped delay for an attempt
//! - [`calculate_backoff`]: jitter scaling plus the `max_delay` clamp
//! - [`parse_retry_after_header`]: parse a `Retry-After` HTTP header

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound of the jitter scaling factor.
pub const JITTER_MIN: f64 = 0.75;
/// Upper bound of the jitter scaling factor.
pub const JITTER_MAX: f64 = 1.25;

/// Default maximum attempts (including the first call).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default minimum delay before retrying a rate-limited call, in milliseconds.
pub const DEFAULT_RATE_LIMIT_MIN_DELAY_MS: u64 = 5000;

/// Delay growth strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `base` for every attempt.
    Fixed,
    /// `attempt * base`.
    Linear,
    /// `base * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff kind: {other}")),
        }
    }
}

/// Delay for a one-based `attempt` before jitter and clamping.
///
/// Saturates at [`Duration::MAX`] instead of overflowing.
pub fn raw_backoff(kind: BackoffKind, attempt: u32, base: Duration) -> Duration {
    let attempt = attempt.max(1);
    match kind {
        BackoffKind::Fixed => base,
        BackoffKind::Linear => base.saturating_mul(attempt),
        BackoffKind::Exponential => {
            let exponent = attempt - 1;
            if exponent >= 32 {
                return if base.is_zero() { base } else { Duration::MAX };
            }
            base.saturating_mul(1u32 << exponent)
        }
    }
}

/// Delay for a one-based `attempt`, scaled by `jitter_factor` and clamped
/// to `max_delay`.
///
/// `jitter_factor` is `1.0` when jitter is disabled, otherwise a sample from
/// `[JITTER_MIN, JITTER_MAX]`.
pub fn calculate_backoff(
    kind: BackoffKind,
    attempt: u32,
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
) -> Duration {
    let raw = raw_backoff(kind, attempt, base);
    #[allow(clippy::float_cmp)] // exact 1.0 means "no jitter"
    let scaled = if jitter_factor == 1.0 {
        raw
    } else {
        let factor = jitter_factor.clamp(JITTER_MIN, JITTER_MAX);
        let secs = (raw.as_secs_f64() * factor).min(max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(max_delay)
    };
    scaled.min(max_delay)
}

/// Parse a `Retry-After` HTTP header value.
///
/// The value can be either:
/// - A number of seconds (e.g. `"120"`)
/// - An HTTP-date (e.g. `"Thu, 01 Dec 2025 16:00:00 GMT"`)
///
/// Dates in the past yield a zero delay. Returns `None` if parsing fails.
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delay = date.signed_duration_since(chrono::Utc::now());
    Some(delay.to_std().unwrap_or(Duration::ZERO))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
