//! # tether-llm
//!
//! The resilient request path for LLM provider calls.
//!
//! - [`breaker`]: per-provider circuit breakers and their registry
//! - [`policy`]: backoff policy with jitter and delay overrides
//! - [`retry`]: [`RetryState`] bookkeeping and the [`RetryExecutor`] loop
//! - [`sse`]: incremental line buffering and event record assembly
//! - [`decode`]: provider chunk decoders ([`OpenAiChunkDecoder`], [`AnthropicChunkDecoder`])
//! - [`stream`]: the [`StreamProcessor`] driving decoders over a byte stream
//! - [`transport`]: the HTTP boundary and its `reqwest` implementation
//! - [`client`]: [`ResilientClient`], the composition root

#![deny(unsafe_code)]

pub mod breaker;
pub mod client;
pub mod decode;
pub mod error;
pub mod policy;
pub mod retry;
pub mod sse;
pub mod stream;
pub mod transport;

pub use breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::ResilientClient;
pub use decode::{AnthropicChunkDecoder, ChunkDecoder, OpenAiChunkDecoder, RawEventFrame};
pub use error::{ExecutionError, StreamError, TerminalReason};
pub use policy::RetryPolicy;
pub use retry::{AttemptFailure, RetryDecision, RetryExecutor, RetryState};
pub use stream::{StreamProcessor, StreamSummary};
pub use transport::{
    ByteStream, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, StreamingResponse,
};
