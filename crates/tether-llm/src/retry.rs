//! # Retry Executor
//!
//! Runs one logical call as a sequence of attempts:
//!
//! 1. Stop if cancelled; stop if the breaker refuses the attempt
//! 2. Invoke the operation (cancellable while in flight)
//! 3. On success, record it on the breaker and return
//! 4. On failure, classify it, record it on the breaker, and let
//!    [`next_step`] decide between stopping and waiting
//! 5. Wait out the delay (cancellable) and go again
//!
//! Retry bookkeeping lives in an explicit [`RetryState`] value threaded
//! through [`next_step`], so the decision logic is testable without a
//! runtime. Streaming calls retry only the opening request; once bytes are
//! delivered to the consumer, a failure is terminal.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::HeaderMap;
use tether_core::retry::{JITTER_MAX, JITTER_MIN, parse_retry_after_header};
use tether_core::{ClassifiedError, ErrorCategory, ProviderId, TransportError, classify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::decode::ChunkDecoder;
use crate::error::{BoxError, ExecutionError, StreamError};
use crate::policy::RetryPolicy;
use crate::stream::{StreamProcessor, StreamSummary};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, StreamingResponse};

/// Headers that carry an upstream request id.
const REQUEST_ID_HEADERS: &[&str] = &["x-request-id", "request-id"];

// ─────────────────────────────────────────────────────────────────────────────
// Attempt failures
// ─────────────────────────────────────────────────────────────────────────────

/// Raw failure of one attempt, before classification.
#[derive(Debug)]
pub enum AttemptFailure {
    /// No response was received.
    Transport(TransportError),
    /// A non-2xx response.
    Status {
        /// Status code.
        status: u16,
        /// Response headers (`retry-after`, request ids).
        headers: HeaderMap,
        /// Error body.
        body: Bytes,
    },
    /// Already classified by the caller.
    Classified(ClassifiedError),
}

impl AttemptFailure {
    /// Classify this failure for `provider`.
    pub fn classify(&self, provider: &ProviderId) -> ClassifiedError {
        match self {
            Self::Transport(e) => classify(Some(e), None, None, provider),
            Self::Status {
                status,
                headers,
                body,
            } => {
                let mut err = classify(None, Some(*status), Some(&body[..]), provider);
                if let Some(delay) = headers
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after_header)
                {
                    err = err.with_retry_after(delay);
                }
                if let Some(request_id) = REQUEST_ID_HEADERS
                    .iter()
                    .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
                {
                    err = err.with_request_id(request_id);
                }
                err
            }
            Self::Classified(e) => e.clone(),
        }
    }
}

impl From<TransportError> for AttemptFailure {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ClassifiedError> for AttemptFailure {
    fn from(e: ClassifiedError) -> Self {
        Self::Classified(e)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry state
// ─────────────────────────────────────────────────────────────────────────────

/// Bookkeeping for one logical call.
#[derive(Clone, Debug)]
pub struct RetryState {
    /// Attempts started so far.
    pub attempt: u32,
    /// Attempt limit.
    pub max_attempts: u32,
    /// Classification of the most recent failure.
    pub last_error: Option<ClassifiedError>,
    /// Sum of completed backoff waits.
    pub total_delay_elapsed: Duration,
    /// Delay before the next attempt.
    pub next_delay: Duration,
}

impl RetryState {
    /// Fresh state for a call under `policy`.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.attempts(),
            last_error: None,
            total_delay_elapsed: Duration::ZERO,
            next_delay: Duration::ZERO,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Wait `next_delay`, then try again.
    Retry(RetryState),
    /// Give up with this error.
    Stop(ExecutionError),
}

/// Decide the next step after attempt `state.attempt` failed with `error`.
///
/// `jitter_sample` is a factor in `[0.75, 1.25]`, used only if the policy
/// enables jitter.
pub fn next_step(
    state: RetryState,
    error: ClassifiedError,
    policy: &RetryPolicy,
    jitter_sample: f64,
) -> RetryDecision {
    if !error.retryable() {
        return RetryDecision::Stop(ExecutionError::NonRetryable {
            last_error: error,
            attempts: state.attempt,
            total_delay: state.total_delay_elapsed,
        });
    }
    if state.attempt >= state.max_attempts {
        return RetryDecision::Stop(ExecutionError::Exhausted {
            last_error: error,
            attempts: state.attempt,
            total_delay: state.total_delay_elapsed,
        });
    }
    let next_delay = policy.delay_for(state.attempt, &error, jitter_sample);
    RetryDecision::Retry(RetryState {
        last_error: Some(error),
        next_delay,
        ..state
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Retry loop with a per-instance jitter source.
#[derive(Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl RetryExecutor {
    /// Executor whose jitter is seeded from the OS.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Executor with reproducible jitter.
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn jitter_sample(&self) -> f64 {
        self.rng.lock().random_range(JITTER_MIN..=JITTER_MAX)
    }

    /// Run `op` until it succeeds, fails terminally, or `cancel` fires.
    pub async fn execute<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        self.run(breaker, cancel, op).await.map(|(value, _)| value)
    }

    async fn run<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<(T, u32), ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let provider = breaker.provider();
        let mut state = RetryState::new(&self.policy);

        loop {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled {
                    attempts: state.attempt,
                    last_error: state.last_error,
                });
            }
            if !breaker.allow() {
                warn!(provider = %provider, attempts = state.attempt, "circuit open, rejecting call");
                return Err(ExecutionError::CircuitOpen {
                    provider: provider.clone(),
                    attempts: state.attempt,
                    last_error: state.last_error,
                });
            }

            state.attempt += 1;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(provider = %provider, attempt = state.attempt, "cancelled during attempt");
                    return Err(ExecutionError::Cancelled {
                        attempts: state.attempt,
                        last_error: state.last_error,
                    });
                }
                outcome = op() => outcome,
            };

            let failure = match outcome {
                Ok(value) => {
                    breaker.record_success();
                    return Ok((value, state.attempt));
                }
                Err(failure) => failure,
            };

            let error = failure.classify(provider);
            breaker.record_failure();

            state = match next_step(state, error, &self.policy, self.jitter_sample()) {
                RetryDecision::Retry(next) => next,
                RetryDecision::Stop(err) => {
                    if let Some(last) = err.last_error() {
                        warn!(
                            provider = %provider,
                            reason = %err.reason(),
                            attempts = err.attempts(),
                            category = %last.category(),
                            severity = %last.severity(),
                            code = last.code(),
                            "giving up"
                        );
                    }
                    return Err(err);
                }
            };

            if let Some(last) = &state.last_error {
                warn!(
                    provider = %provider,
                    attempt = state.attempt,
                    max_attempts = state.max_attempts,
                    delay_ms = u64::try_from(state.next_delay.as_millis()).unwrap_or(u64::MAX),
                    category = %last.category(),
                    code = last.code(),
                    "retrying after failure"
                );
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ExecutionError::Cancelled {
                        attempts: state.attempt,
                        last_error: state.last_error,
                    });
                }
                () = tokio::time::sleep(state.next_delay) => {}
            }
            state.total_delay_elapsed = state.total_delay_elapsed.saturating_add(state.next_delay);
        }
    }

    /// Send `request` with retries; non-2xx responses count as failures.
    pub async fn execute_with_retry(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancellationToken,
        transport: &dyn HttpTransport,
        request: &HttpRequest,
    ) -> Result<HttpResponse, ExecutionError> {
        self.execute(breaker, cancel, || async {
            let response = transport.send(request.clone()).await?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(AttemptFailure::Status {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                })
            }
        })
        .await
    }

    /// Open a stream with retries, then feed it through `decoder` to
    /// `on_chunk`.
    ///
    /// Only opening is retried. After the stream is open, a read failure or
    /// an in-band error event is recorded on the breaker and returned as
    /// [`ExecutionError::Stream`]; consumer errors and cancellation are not
    /// held against the upstream.
    pub async fn execute_streaming_with_retry<D, O, OFut, C, E>(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancellationToken,
        decoder: D,
        mut open: O,
        on_chunk: C,
    ) -> Result<StreamSummary, ExecutionError>
    where
        D: ChunkDecoder,
        O: FnMut() -> OFut,
        OFut: Future<Output = Result<StreamingResponse, TransportError>>,
        C: FnMut(tether_core::StreamChunk) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let (response, attempts) = self
            .run(breaker, cancel, || {
                let opening = open();
                async move {
                    let response = opening.await?;
                    if response.is_success() {
                        return Ok(response);
                    }
                    let status = response.status;
                    let headers = response.headers.clone();
                    let body = response.collect().await.unwrap_or_default();
                    Err(AttemptFailure::Status {
                        status,
                        headers,
                        body,
                    })
                }
            })
            .await?;

        let provider = breaker.provider();
        let mut processor = StreamProcessor::new(decoder);
        match processor.process(response.body, on_chunk, cancel).await {
            Ok(summary) => Ok(summary),
            Err(StreamError::Cancelled) => Err(ExecutionError::Cancelled {
                attempts,
                last_error: None,
            }),
            Err(source @ StreamError::Consumer(_)) => Err(ExecutionError::Stream {
                source,
                attempts,
                last_error: None,
            }),
            Err(source) => {
                breaker.record_failure();
                let last_error = match &source {
                    StreamError::Transport(e) => classify(Some(e), None, None, provider),
                    StreamError::Upstream(e) => e.clone(),
                    _ => ClassifiedError::new(
                        provider.clone(),
                        ErrorCategory::Network,
                        "stream closed before any event",
                    ),
                };
                warn!(
                    provider = %provider,
                    category = %last_error.category(),
                    error = %source,
                    "stream failed after opening"
                );
                Err(ExecutionError::Stream {
                    source,
                    attempts,
                    last_error: Some(last_error),
                })
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
