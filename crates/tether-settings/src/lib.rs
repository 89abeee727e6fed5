//! # tether-settings
//!
//! Resilience configuration for the Tether client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ResilienceSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! The loaded value is validated and handed to the client's composition
//! root. There is no process-wide settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path, load_settings_with, settings_path,
};
pub use types::{CircuitSettings, LoggingSettings, ResilienceSettings, RetrySettings};
