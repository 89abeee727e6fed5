//! Upstream identity.
//!
//! A [`ProviderId`] names one upstream (one circuit breaker, one error
//! lookup table). [`ProviderKind`] is the coarse family used to pick the
//! provider-specific error code table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one upstream LLM API (e.g. `"anthropic"`, `"openai"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a provider id. The value is lowercased and trimmed.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_lowercase())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The provider family this id belongs to.
    pub fn kind(&self) -> ProviderKind {
        ProviderKind::of(self)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Provider family, selecting the structured error code table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API (and compatible endpoints).
    Anthropic,
    /// `OpenAI` chat completions (and compatible endpoints).
    OpenAi,
    /// Google Gemini / Vertex.
    Google,
    /// Anything else; only the generic code table applies.
    Generic,
}

impl ProviderKind {
    /// Resolve the family of a provider id.
    pub fn of(id: &ProviderId) -> Self {
        match id.as_str() {
            "anthropic" | "claude" | "minimax" => Self::Anthropic,
            "openai" | "azure-openai" | "openrouter" => Self::OpenAi,
            "google" | "gemini" | "vertex" => Self::Google,
            _ => Self::Generic,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Google => write!(f, "google"),
            Self::Generic => write!(f, "generic"),
        }
    }
}
