//! # tether-core
//!
//! Foundation types shared by every Tether crate:
//!
//! - **Provider identity**: [`ProviderId`] newtype and [`ProviderKind`] lookup key
//! - **Errors**: [`ClassifiedError`] with a closed [`ErrorCategory`] taxonomy,
//!   [`TransportError`], and the [`classify`] entry point
//! - **Streaming messages**: [`StreamChunk`], [`Message`], [`TokenUsage`], [`FinishReason`]
//! - **Retry math**: [`retry::BackoffKind`] and jittered, clamped delay calculation
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod retry;

pub use errors::classify::classify;
pub use errors::transport::{TransportError, TransportErrorKind};
pub use errors::{ClassifiedError, ErrorCategory, ErrorSeverity};
pub use ids::{ProviderId, ProviderKind};
pub use messages::{FinishReason, Message, Role, StreamChunk, TokenUsage, ToolCallDelta};
