//! The error classifier.
//!
//! [`classify`] turns a raw failure into a [`ClassifiedError`], checking the
//! sources in priority order:
//!
//! 1. A structured provider error body whose code maps through the provider table
//! 2. The HTTP status code
//! 3. The transport error kind, then known substrings of its message
//!
//! It only labels; it never retries anything itself.

use tracing::debug;

use crate::errors::payload::ApiErrorInfo;
use crate::errors::transport::{TransportError, TransportErrorKind};
use crate::errors::{ClassifiedError, ErrorCategory};
use crate::ids::ProviderId;

/// Longest body excerpt carried into a status-only message.
const BODY_PREVIEW_CHARS: usize = 200;

/// Classify a failed upstream call.
pub fn classify(
    transport: Option<&TransportError>,
    status: Option<u16>,
    body: Option<&[u8]>,
    provider: &ProviderId,
) -> ClassifiedError {
    let classified = classify_inner(transport, status, body, provider);
    debug!(
        provider = %provider,
        category = %classified.category(),
        code = classified.code(),
        status = ?status,
        retryable = classified.retryable(),
        "classified upstream failure"
    );
    classified
}

fn classify_inner(
    transport: Option<&TransportError>,
    status: Option<u16>,
    body: Option<&[u8]>,
    provider: &ProviderId,
) -> ClassifiedError {
    let info = body.filter(|b| !b.is_empty()).and_then(ApiErrorInfo::parse);

    // 1. Structured provider payload
    if let Some(info) = &info {
        if let Some((category, code)) = info.category(provider.kind()) {
            let mut err = ClassifiedError::new(provider.clone(), category, info.message.clone())
                .with_code(code);
            if let Some(status) = status {
                err = err.with_status(status);
            }
            if let Some(request_id) = &info.request_id {
                err = err.with_request_id(request_id.clone());
            }
            return err;
        }
    }

    // 2. HTTP status
    if let Some(status) = status {
        let category = category_for_status(status);
        let (message, code) = match &info {
            Some(info) => (
                info.message.clone(),
                info.code().map_or_else(|| format!("HTTP_{status}"), String::from),
            ),
            None => (status_message(status, body), format!("HTTP_{status}")),
        };
        let mut err = ClassifiedError::new(provider.clone(), category, message)
            .with_code(code)
            .with_status(status);
        if let Some(request_id) = info.as_ref().and_then(|i| i.request_id.clone()) {
            err = err.with_request_id(request_id);
        }
        return err;
    }

    // 3. Transport error
    if let Some(transport) = transport {
        let category = category_for_transport(transport);
        return ClassifiedError::new(provider.clone(), category, transport.message())
            .with_code(format!("TRANSPORT_{}", transport.kind().to_string().to_uppercase()))
            .with_cause(transport.clone());
    }

    ClassifiedError::new(provider.clone(), ErrorCategory::Unknown, "unclassified failure")
}

/// Category implied by an HTTP status alone.
pub fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Authorization,
        429 => ErrorCategory::RateLimit,
        408 => ErrorCategory::Timeout,
        449 | 509 => ErrorCategory::Network,
        400..=499 => ErrorCategory::Validation,
        500..=599 => ErrorCategory::Server,
        _ => ErrorCategory::Unknown,
    }
}

/// Category implied by a transport failure.
pub fn category_for_transport(error: &TransportError) -> ErrorCategory {
    match error.kind() {
        TransportErrorKind::Timeout => ErrorCategory::Timeout,
        TransportErrorKind::Connect | TransportErrorKind::Dns | TransportErrorKind::Body => {
            ErrorCategory::Network
        }
        TransportErrorKind::Decode => ErrorCategory::Parsing,
        TransportErrorKind::Other => category_for_message(error.message()),
    }
}

struct MessagePattern {
    needles: &'static [&'static str],
    category: ErrorCategory,
}

/// Known transport message fragments, checked in order.
static MESSAGE_PATTERNS: &[MessagePattern] = &[
    MessagePattern {
        needles: &["timed out", "timeout", "deadline exceeded", "etimedout"],
        category: ErrorCategory::Timeout,
    },
    MessagePattern {
        needles: &[
            "connection refused",
            "econnrefused",
            "connection reset",
            "econnreset",
            "broken pipe",
        ],
        category: ErrorCategory::Network,
    },
    MessagePattern {
        needles: &[
            "dns",
            "name resolution",
            "failed to lookup",
            "no such host",
            "enotfound",
        ],
        category: ErrorCategory::Network,
    },
    MessagePattern {
        needles: &[
            "decode",
            "invalid json",
            "expected value",
            "eof while parsing",
            "unexpected end",
        ],
        category: ErrorCategory::Parsing,
    },
];

fn category_for_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|p| p.needles.iter().any(|n| lower.contains(n)))
        .map_or(ErrorCategory::Unknown, |p| p.category)
}

fn status_message(status: u16, body: Option<&[u8]>) -> String {
    let text = body.map(String::from_utf8_lossy).unwrap_or_default();
    let preview: String = text.trim().chars().take(BODY_PREVIEW_CHARS).collect();
    if preview.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {preview}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
