//! Transport-level failures.
//!
//! A [`TransportError`] is produced before (or instead of) an HTTP status:
//! connection refused, DNS failure, timeouts, body decode failures. The
//! transport implementation assigns a [`TransportErrorKind`] when it knows
//! one; otherwise the classifier falls back to substring matching on the
//! message.

use std::fmt;
use std::sync::Arc;

use crate::errors::ErrorCause;

/// Known transport failure kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request or a body read timed out.
    Timeout,
    /// The TCP/TLS connection could not be established.
    Connect,
    /// The host name could not be resolved.
    Dns,
    /// The response body could not be decoded.
    Decode,
    /// The body stream broke after the response started.
    Body,
    /// Kind not determined by the transport.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Dns => write!(f, "dns"),
            Self::Decode => write!(f, "decode"),
            Self::Body => write!(f, "body"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A failure raised by the transport layer.
#[derive(Clone, Debug, thiserror::Error)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<ErrorCause>,
}

impl TransportError {
    /// Create a transport error of a known kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error whose kind is unknown.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Failure kind.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = TransportError::new(TransportErrorKind::Dns, "no such host");
        assert_eq!(err.to_string(), "transport error (dns): no such host");
    }

    #[test]
    fn other_kind() {
        let err = TransportError::other("weird");
        assert_eq!(err.kind(), TransportErrorKind::Other);
        assert_eq!(err.message(), "weird");
    }
}
