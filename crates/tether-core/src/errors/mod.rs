//! Provider-independent error taxonomy.
//!
//! Every upstream failure is labelled exactly once, at classification time,
//! into a [`ClassifiedError`]:
//!
//! - [`ErrorCategory`]: closed enumeration deciding retryability
//! - [`ErrorSeverity`]: fixed per category, for logging and alerting only
//! - [`transport`]: transport-level failures before any HTTP status exists
//! - [`payload`]: structured error envelopes and provider code tables
//! - [`classify`]: the single entry point combining all three origins

pub mod classify;
pub mod payload;
pub mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::ProviderId;

// ─────────────────────────────────────────────────────────────────────────────
// Category & severity
// ─────────────────────────────────────────────────────────────────────────────

/// Error category for classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid or expired credentials.
    Authentication,
    /// Insufficient permissions.
    Authorization,
    /// Rate limit exceeded.
    RateLimit,
    /// Malformed or unacceptable request (4xx).
    Validation,
    /// Connectivity issues.
    Network,
    /// Server-side errors (5xx).
    Server,
    /// The upstream or the transport timed out.
    Timeout,
    /// Usage quota or credits exhausted.
    Quota,
    /// Output or input blocked by a content policy.
    ContentFilter,
    /// Response payload could not be decoded.
    Parsing,
    /// Unrecognized error.
    Unknown,
}

impl ErrorCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Authentication,
        Self::Authorization,
        Self::RateLimit,
        Self::Validation,
        Self::Network,
        Self::Server,
        Self::Timeout,
        Self::Quota,
        Self::ContentFilter,
        Self::Parsing,
        Self::Unknown,
    ];

    /// Whether failures in this category may be retried.
    ///
    /// This table is the only place retryability is decided.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Server | Self::RateLimit
        )
    }

    /// Fixed severity for this category.
    pub fn severity(self) -> ErrorSeverity {
        match self {
            Self::Authentication | Self::Authorization => ErrorSeverity::Critical,
            Self::Quota | Self::Server => ErrorSeverity::High,
            Self::RateLimit | Self::Network | Self::Timeout | Self::Unknown => {
                ErrorSeverity::Medium
            }
            Self::Validation | Self::ContentFilter | Self::Parsing => ErrorSeverity::Low,
        }
    }

    /// Snake-case name, as used in error codes and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::Quota => "quota",
            Self::ContentFilter => "content_filter",
            Self::Parsing => "parsing",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels. Never used for control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Expected, caller-side problem.
    Low,
    /// Transient upstream pressure.
    Medium,
    /// Upstream is unhealthy or the account is exhausted.
    High,
    /// Credentials or permissions are wrong; nothing will work until fixed.
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ClassifiedError
// ─────────────────────────────────────────────────────────────────────────────

/// Shared, clonable error cause.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync>;

/// A normalized upstream failure.
///
/// Immutable once constructed: `retryable` and `severity` are derived from
/// `category` and cannot be set independently.
#[derive(Clone, Debug, thiserror::Error)]
#[error("[{provider}/{code}] {message}")]
pub struct ClassifiedError {
    code: String,
    category: ErrorCategory,
    message: String,
    provider: ProviderId,
    http_status: Option<u16>,
    request_id: Option<String>,
    retry_after: Option<Duration>,
    #[source]
    cause: Option<ErrorCause>,
}

impl ClassifiedError {
    /// Create a classified error. The code defaults to the upper-cased category.
    pub fn new(
        provider: ProviderId,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: category.as_str().to_uppercase(),
            category,
            message: message.into(),
            provider,
            http_status: None,
            request_id: None,
            retry_after: None,
            cause: None,
        }
    }

    /// Classification of a transport failure (no HTTP status received).
    pub fn from_transport(provider: ProviderId, error: &transport::TransportError) -> Self {
        classify::classify(Some(error), None, None, &provider)
    }

    /// Classification of a non-2xx response with an optional body.
    pub fn from_status(provider: ProviderId, status: u16, body: Option<&[u8]>) -> Self {
        classify::classify(None, Some(status), body, &provider)
    }

    /// Classification of an in-band error payload (e.g. an `error` stream frame).
    pub fn from_payload(provider: ProviderId, payload: &serde_json::Value) -> Self {
        match payload::ApiErrorInfo::from_value(payload) {
            Some(info) => {
                let (category, code) = match info.category(provider.kind()) {
                    Some((category, code)) => (category, Some(code.to_string())),
                    None => (ErrorCategory::Unknown, info.code().map(String::from)),
                };
                let mut err = Self::new(provider, category, info.message.clone());
                if let Some(code) = code {
                    err.code = code;
                }
                err.request_id = info.request_id;
                err
            }
            None => Self::new(provider, ErrorCategory::Parsing, "unrecognized error payload"),
        }
    }

    /// Set a specific error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Set the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Set the upstream request id, unless one is already known.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        if self.request_id.is_none() {
            self.request_id = Some(request_id.into());
        }
        self
    }

    /// Set the upstream-suggested minimum delay before retrying.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Machine-readable code (provider code when known).
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Error category.
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Severity, derived from the category.
    pub fn severity(&self) -> ErrorSeverity {
        self.category.severity()
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Upstream that produced the failure.
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Whether this failure may be retried, derived from the category.
    pub fn retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// HTTP status, if a response was received.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Upstream request id, if reported.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Upstream-suggested minimum retry delay, if reported.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Underlying cause, if any.
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
