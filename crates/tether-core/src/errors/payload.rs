//! Structured error envelopes and provider code tables.
//!
//! Handles the error body shapes seen across providers:
//! - Standard: `{"error": {"message": "...", "type": "...", "code": "..."}}`
//! - Google:   `{"error": {"message": "...", "status": "...", "code": 429}}`
//! - Detail:   `{"detail": "..."}`
//! - Flat:     `{"message": "...", "code": "..."}`
//!
//! Provider codes are mapped to an [`ErrorCategory`] through a
//! provider-specific table, then a generic table shared by every provider.

use serde_json::Value;

use crate::errors::ErrorCategory;
use crate::ids::ProviderKind;

/// Parsed provider error envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiErrorInfo {
    /// Human-readable error message.
    pub message: String,
    /// Candidate codes, most specific first (`code`, `type`, `status`).
    pub codes: Vec<String>,
    /// Request id reported in the body, if any.
    pub request_id: Option<String>,
}

impl ApiErrorInfo {
    /// Parse an error body. Returns `None` when the body is not JSON or has
    /// no recognizable error shape.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let json: Value = serde_json::from_slice(body).ok()?;
        Self::from_value(&json)
    }

    /// Extract error info from an already-decoded JSON value.
    pub fn from_value(json: &Value) -> Option<Self> {
        let request_id = json["request_id"]
            .as_str()
            .or_else(|| json["error"]["request_id"].as_str())
            .map(String::from);

        if let Some(msg) = json["error"]["message"].as_str() {
            let error = &json["error"];
            let codes = ["code", "type", "status"]
                .iter()
                .filter_map(|key| error[*key].as_str())
                .filter(|code| !code.is_empty())
                .map(String::from)
                .collect();
            return Some(Self {
                message: msg.to_string(),
                codes,
                request_id,
            });
        }

        // {"error": "some string"}
        if let Some(msg) = json["error"].as_str() {
            return Some(Self {
                message: msg.to_string(),
                codes: Vec::new(),
                request_id,
            });
        }

        if let Some(msg) = json["detail"].as_str().or_else(|| json["message"].as_str()) {
            let codes = ["code", "type"]
                .iter()
                .filter_map(|key| json[*key].as_str())
                .filter(|code| !code.is_empty())
                .map(String::from)
                .collect();
            return Some(Self {
                message: msg.to_string(),
                codes,
                request_id,
            });
        }

        None
    }

    /// The most specific code, if any.
    pub fn code(&self) -> Option<&str> {
        self.codes.first().map(String::as_str)
    }

    /// First code that maps to a category for this provider family.
    pub fn category(&self, kind: ProviderKind) -> Option<(ErrorCategory, &str)> {
        self.codes
            .iter()
            .find_map(|code| category_for_code(kind, code).map(|c| (c, code.as_str())))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Code tables
// ─────────────────────────────────────────────────────────────────────────────

type CodeTable = &'static [(&'static str, ErrorCategory)];

static ANTHROPIC_CODES: CodeTable = &[
    ("authentication_error", ErrorCategory::Authentication),
    ("permission_error", ErrorCategory::Authorization),
    ("not_found_error", ErrorCategory::Validation),
    ("invalid_request_error", ErrorCategory::Validation),
    ("request_too_large", ErrorCategory::Validation),
    ("rate_limit_error", ErrorCategory::RateLimit),
    ("api_error", ErrorCategory::Server),
    ("overloaded_error", ErrorCategory::Server),
    ("timeout_error", ErrorCategory::Timeout),
    ("billing_error", ErrorCategory::Quota),
];

static OPENAI_CODES: CodeTable = &[
    ("invalid_api_key", ErrorCategory::Authentication),
    ("invalid_authentication", ErrorCategory::Authentication),
    ("unsupported_country_region_territory", ErrorCategory::Authorization),
    ("insufficient_quota", ErrorCategory::Quota),
    ("rate_limit_exceeded", ErrorCategory::RateLimit),
    ("context_length_exceeded", ErrorCategory::Validation),
    ("model_not_found", ErrorCategory::Validation),
    ("invalid_request_error", ErrorCategory::Validation),
    ("content_filter", ErrorCategory::ContentFilter),
    ("content_policy_violation", ErrorCategory::ContentFilter),
    ("server_error", ErrorCategory::Server),
    ("timeout", ErrorCategory::Timeout),
];

static GOOGLE_CODES: CodeTable = &[
    ("unauthenticated", ErrorCategory::Authentication),
    ("permission_denied", ErrorCategory::Authorization),
    ("resource_exhausted", ErrorCategory::RateLimit),
    ("invalid_argument", ErrorCategory::Validation),
    ("failed_precondition", ErrorCategory::Validation),
    ("not_found", ErrorCategory::Validation),
    ("internal", ErrorCategory::Server),
    ("unavailable", ErrorCategory::Server),
    ("deadline_exceeded", ErrorCategory::Timeout),
];

static GENERIC_CODES: CodeTable = &[
    ("unauthorized", ErrorCategory::Authentication),
    ("forbidden", ErrorCategory::Authorization),
    ("rate_limit", ErrorCategory::RateLimit),
    ("rate_limited", ErrorCategory::RateLimit),
    ("too_many_requests", ErrorCategory::RateLimit),
    ("quota_exceeded", ErrorCategory::Quota),
    ("bad_request", ErrorCategory::Validation),
    ("content_filtered", ErrorCategory::ContentFilter),
    ("safety", ErrorCategory::ContentFilter),
    ("overloaded", ErrorCategory::Server),
    ("internal_error", ErrorCategory::Server),
    ("service_unavailable", ErrorCategory::Server),
    ("timeout", ErrorCategory::Timeout),
];

fn table_for(kind: ProviderKind) -> CodeTable {
    match kind {
        ProviderKind::Anthropic => ANTHROPIC_CODES,
        ProviderKind::OpenAi => OPENAI_CODES,
        ProviderKind::Google => GOOGLE_CODES,
        ProviderKind::Generic => &[],
    }
}

/// Map a provider error code to a category. Case-insensitive.
pub fn category_for_code(kind: ProviderKind, code: &str) -> Option<ErrorCategory> {
    let code = code.trim().to_ascii_lowercase();
    table_for(kind)
        .iter()
        .chain(GENERIC_CODES.iter())
        .find(|(known, _)| *known == code)
        .map(|(_, category)| *category)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
