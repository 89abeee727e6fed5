//! Circuit breakers, one per provider.
//!
//! A [`CircuitBreaker`] moves through three states:
//!
//! - **Closed**: every call is allowed; consecutive failures are counted
//! - **Open**: calls are rejected until `reset_timeout` has passed since the
//!   last failure, then exactly one caller is granted a trial
//! - **Half-open**: the trial is in flight; its success closes the circuit,
//!   its failure re-opens it
//!
//! All transitions happen under one lock, so concurrent callers observe them
//! as if serialized. A [`BreakerRegistry`] owns one breaker per
//! [`ProviderId`] and hands out shared references.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tether_core::ProviderId;
use tether_settings::CircuitSettings;
use tokio::time::Instant;
use tracing::{info, warn};

/// Externally visible breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. Values below 1 act as 1.
    pub max_failures: u32,
    /// Minimum time since the last failure before a trial call.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitSettings::default())
    }
}

impl From<&CircuitSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitSettings) -> Self {
        Self {
            max_failures: settings.max_failures,
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_started: Option<Instant>,
}

/// Circuit breaker guarding one upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_started: None,
            }),
        }
    }

    /// Upstream this breaker guards.
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Thresholds in use.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Ask permission for one call.
    ///
    /// While open, the first caller after `reset_timeout` moves the breaker
    /// to half-open and is the only one granted. A half-open trial that never
    /// reports back is replaced after another `reset_timeout`.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .is_none_or(|t| now.duration_since(t) > self.config.reset_timeout);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started = Some(now);
                    info!(provider = %self.provider, "circuit half-open, allowing trial call");
                }
                cooled
            }
            CircuitState::HalfOpen => {
                let stale = inner
                    .trial_started
                    .is_none_or(|t| now.duration_since(t) > self.config.reset_timeout);
                if stale {
                    inner.trial_started = Some(now);
                    warn!(provider = %self.provider, "half-open trial never reported, allowing another");
                }
                stale
            }
        }
    }

    /// Record a successful call. Closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.trial_started = None;
        if inner.state != CircuitState::Closed {
            info!(provider = %self.provider, from = %inner.state, "circuit closed after successful call");
            inner.state = CircuitState::Closed;
        }
    }

    /// Record a failed call, opening the circuit at the threshold or when a
    /// half-open trial fails.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let tripped = inner.consecutive_failures >= self.config.max_failures.max(1);
        let should_open = match inner.state {
            CircuitState::Closed => tripped,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            warn!(
                provider = %self.provider,
                failures = inner.consecutive_failures,
                reset_timeout_ms = u64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(u64::MAX),
                "circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.trial_started = None;
        }
    }

    /// Return to closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.trial_started = None;
        info!(provider = %self.provider, "circuit manually reset");
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Point-in-time view of this breaker.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            provider: self.provider.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Serializable breaker status for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    /// Upstream identity.
    pub provider: ProviderId,
    /// State at snapshot time.
    pub state: CircuitState,
    /// Consecutive failures at snapshot time.
    pub consecutive_failures: u32,
}

/// One breaker per provider, created on first use.
///
/// Build once at startup and share via `Arc<BreakerRegistry>`.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry; every breaker uses `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `provider`, creating it closed if absent.
    pub fn breaker(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(
            breakers
                .entry(provider.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(provider.clone(), self.config))),
        )
    }

    /// Breaker for `provider`, if one has been created.
    pub fn get(&self, provider: &ProviderId) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(provider).cloned()
    }

    /// Reset one provider's breaker. Returns `false` if it does not exist.
    pub fn reset(&self, provider: &ProviderId) -> bool {
        match self.get(provider) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker.
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.lock().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Status of every breaker, ordered by provider.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = self.breakers.lock().values().cloned().collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider.as_str().cmp(b.provider.as_str()));
        snapshots
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
