//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ResilienceSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ResilienceSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ResilienceSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with process env var overrides.
pub fn load_settings_from_path(path: &Path) -> Result<ResilienceSettings> {
    load_settings_with(path, process_env)
}

/// Load settings from a specific path, reading overrides through `lookup`.
///
/// If the file does not exist, defaults are used. Invalid JSON or a failed
/// validation is an error; invalid override values are ignored.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<ResilienceSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(ResilienceSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ResilienceSettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut ResilienceSettings) {
    apply_overrides_from(settings, process_env);
}

/// Apply `TETHER_*` overrides read through `lookup`.
///
/// - Integers must be valid and within the listed range
/// - Booleans accept `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored
pub fn apply_overrides_from<F>(settings: &mut ResilienceSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = env.u32("TETHER_MAX_ATTEMPTS", 1, 100) {
        settings.retry.max_attempts = v;
    }
    if let Some(v) = env.u64("TETHER_BASE_DELAY_MS", 0, 3_600_000) {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = env.u64("TETHER_MAX_DELAY_MS", 0, 3_600_000) {
        settings.retry.max_delay_ms = v;
    }
    if let Some(v) = env.string("TETHER_BACKOFF") {
        match v.parse() {
            Ok(kind) => settings.retry.backoff_kind = kind,
            Err(e) => warn!(key = "TETHER_BACKOFF", value = %v, error = %e, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = env.bool("TETHER_JITTER") {
        settings.retry.jitter_enabled = v;
    }
    if let Some(v) = env.u64("TETHER_RATE_LIMIT_MIN_DELAY_MS", 0, 3_600_000) {
        settings.retry.rate_limit_min_delay_ms = v;
    }

    // ── Circuit ─────────────────────────────────────────────────────
    if let Some(v) = env.u32("TETHER_CIRCUIT_MAX_FAILURES", 1, 1000) {
        settings.circuit.max_failures = v;
    }
    if let Some(v) = env.u64("TETHER_CIRCUIT_RESET_TIMEOUT_MS", 0, 86_400_000) {
        settings.circuit.reset_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = self.string(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
