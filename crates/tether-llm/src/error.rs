//! Terminal errors of the resilient call path.
//!
//! [`ExecutionError`] is what a caller sees when a logical call gives up.
//! Each variant maps to one [`TerminalReason`] so callers can tell a
//! configuration problem from transient exhaustion from a deliberate
//! cancellation without inspecting messages.

use std::fmt;
use std::time::Duration;

use tether_core::{ClassifiedError, ProviderId, TransportError};

/// Boxed consumer error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a logical call stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalReason {
    /// Every attempt failed with a retryable error.
    Exhausted,
    /// An attempt failed with a non-retryable error.
    NonRetryable,
    /// The circuit breaker rejected the call.
    CircuitOpen,
    /// The caller cancelled.
    Cancelled,
    /// The stream opened but failed partway through.
    Stream,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "attempts_exhausted"),
            Self::NonRetryable => write!(f, "non_retryable"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Stream => write!(f, "stream_failed"),
        }
    }
}

/// Terminal failure of a retried call.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Retryable failures on every attempt.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Classification of the final attempt's failure.
        #[source]
        last_error: ClassifiedError,
        /// Attempts made.
        attempts: u32,
        /// Time spent in backoff waits.
        total_delay: Duration,
    },

    /// A failure that retrying cannot fix.
    #[error("non-retryable failure on attempt {attempts}: {last_error}")]
    NonRetryable {
        /// The failure that stopped the loop.
        #[source]
        last_error: ClassifiedError,
        /// Attempts made.
        attempts: u32,
        /// Time spent in backoff waits.
        total_delay: Duration,
    },

    /// The breaker rejected the next attempt; the operation was not invoked.
    #[error("circuit open for provider {provider}")]
    CircuitOpen {
        /// Upstream whose breaker is open.
        provider: ProviderId,
        /// Attempts made before the rejection.
        attempts: u32,
        /// Failure of the previous attempt, if any.
        last_error: Option<ClassifiedError>,
    },

    /// Cancelled by the caller.
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
        /// Failure of the previous attempt, if any.
        last_error: Option<ClassifiedError>,
    },

    /// The stream opened but did not complete.
    #[error("stream failed after opening: {source}")]
    Stream {
        /// What went wrong.
        source: StreamError,
        /// Attempts it took to open the stream.
        attempts: u32,
        /// Classification of the failure, when it came from upstream.
        last_error: Option<ClassifiedError>,
    },
}

impl ExecutionError {
    /// Why the call stopped.
    pub fn reason(&self) -> TerminalReason {
        match self {
            Self::Exhausted { .. } => TerminalReason::Exhausted,
            Self::NonRetryable { .. } => TerminalReason::NonRetryable,
            Self::CircuitOpen { .. } => TerminalReason::CircuitOpen,
            Self::Cancelled { .. } => TerminalReason::Cancelled,
            Self::Stream { .. } => TerminalReason::Stream,
        }
    }

    /// Last classified upstream failure, for diagnostics.
    pub fn last_error(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Exhausted { last_error, .. } | Self::NonRetryable { last_error, .. } => {
                Some(last_error)
            }
            Self::CircuitOpen { last_error, .. }
            | Self::Cancelled { last_error, .. }
            | Self::Stream { last_error, .. } => last_error.as_ref(),
        }
    }

    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::CircuitOpen { attempts, .. }
            | Self::Cancelled { attempts, .. }
            | Self::Stream { attempts, .. } => *attempts,
        }
    }

    /// Time spent waiting between attempts, when known.
    pub fn total_delay(&self) -> Option<Duration> {
        match self {
            Self::Exhausted { total_delay, .. } | Self::NonRetryable { total_delay, .. } => {
                Some(*total_delay)
            }
            _ => None,
        }
    }

    /// Whether the call ended because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.reason() == TerminalReason::Cancelled
    }
}

/// Failure while processing an open event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The cancellation token fired.
    #[error("stream cancelled")]
    Cancelled,

    /// The chunk callback returned an error.
    #[error("consumer rejected chunk: {0}")]
    Consumer(#[source] BoxError),

    /// Reading the body failed.
    #[error("stream read failed: {0}")]
    Transport(#[source] TransportError),

    /// The provider sent an in-band error event.
    #[error("upstream error event: {0}")]
    Upstream(#[source] ClassifiedError),

    /// The stream closed before any chunk or the end sentinel.
    #[error("stream closed without any events")]
    Empty,
}

#[cfg(test)]
mod tests {
    use tether_core::ErrorCategory;

    use super::*;

    fn server_error() -> ClassifiedError {
        ClassifiedError::new(ProviderId::new("openai"), ErrorCategory::Server, "boom")
    }

    #[test]
    fn accessors_per_variant() {
        let exhausted = ExecutionError::Exhausted {
            last_error: server_error(),
            attempts: 3,
            total_delay: Duration::from_secs(3),
        };
        assert_eq!(exhausted.reason(), TerminalReason::Exhausted);
        assert_eq!(exhausted.attempts(), 3);
        assert_eq!(exhausted.total_delay(), Some(Duration::from_secs(3)));
        assert_eq!(exhausted.last_error().map(ClassifiedError::code), Some("SERVER"));

        let open = ExecutionError::CircuitOpen {
            provider: ProviderId::new("openai"),
            attempts: 0,
            last_error: None,
        };
        assert_eq!(open.reason(), TerminalReason::CircuitOpen);
        assert!(open.last_error().is_none());

        let cancelled = ExecutionError::Cancelled {
            attempts: 1,
            last_error: Some(server_error()),
        };
        assert!(cancelled.is_cancelled());
        assert!(cancelled.last_error().is_some());
    }

    #[test]
    fn display_mentions_attempts() {
        let err = ExecutionError::Exhausted {
            last_error: server_error(),
            attempts: 3,
            total_delay: Duration::ZERO,
        };
        assert_eq!(err.to_string(), "gave up after 3 attempts: [openai/SERVER] boom");
    }

    #[test]
    fn stream_error_exposes_source() {
        use std::error::Error as _;
        let err = ExecutionError::Stream {
            source: StreamError::Empty,
            attempts: 1,
            last_error: None,
        };
        assert_eq!(err.reason(), TerminalReason::Stream);
        assert!(err.source().is_some());
    }

    #[test]
    fn terminal_reason_display() {
        assert_eq!(TerminalReason::Exhausted.to_string(), "attempts_exhausted");
        assert_eq!(TerminalReason::CircuitOpen.to_string(), "circuit_open");
    }
}
