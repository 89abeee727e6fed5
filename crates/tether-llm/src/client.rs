//! # Resilient Client
//!
//! Composition root for provider calls: one transport, one breaker registry
//! shared by every clone, and one retry executor. Callers pick the provider
//! per call; the provider id selects the breaker and labels every error.

use std::sync::Arc;

use tether_core::{ProviderId, StreamChunk};
use tether_settings::ResilienceSettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreakerConfig};
use crate::decode::ChunkDecoder;
use crate::error::{BoxError, ExecutionError};
use crate::policy::RetryPolicy;
use crate::retry::RetryExecutor;
use crate::stream::StreamSummary;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Retrying, circuit-breaking HTTP client for LLM providers.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    breakers: Arc<BreakerRegistry>,
    executor: Arc<RetryExecutor>,
}

impl ResilientClient {
    /// Create a client from its parts.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        breakers: Arc<BreakerRegistry>,
        executor: RetryExecutor,
    ) -> Self {
        Self {
            transport,
            breakers,
            executor: Arc::new(executor),
        }
    }

    /// Create a `reqwest`-backed client configured from settings.
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        let policy = RetryPolicy::from(&settings.retry);
        let breaker_config = CircuitBreakerConfig::from(&settings.circuit);
        debug!(
            max_attempts = policy.max_attempts,
            max_failures = breaker_config.max_failures,
            "building resilient client"
        );
        Self::new(
            Arc::new(ReqwestTransport::new()),
            Arc::new(BreakerRegistry::new(breaker_config)),
            RetryExecutor::new(policy),
        )
    }

    /// Breaker registry shared by this client and its clones.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Snapshot of every breaker, sorted by provider.
    pub fn breaker_snapshot(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot()
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    /// Send a non-streaming request to `provider`.
    #[instrument(skip_all, fields(provider = %provider, url = %request.url))]
    pub async fn send(
        &self,
        provider: &ProviderId,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ExecutionError> {
        let breaker = self.breakers.breaker(provider);
        self.executor
            .execute_with_retry(&breaker, cancel, self.transport.as_ref(), request)
            .await
    }

    /// Send a streaming request to `provider`, delivering each decoded chunk
    /// to `on_chunk` in arrival order.
    #[instrument(skip_all, fields(provider = %provider, url = %request.url))]
    pub async fn stream<D, C, E>(
        &self,
        provider: &ProviderId,
        request: &HttpRequest,
        decoder: D,
        on_chunk: C,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary, ExecutionError>
    where
        D: ChunkDecoder,
        C: FnMut(StreamChunk) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let breaker = self.breakers.breaker(provider);
        let transport = Arc::clone(&self.transport);
        self.executor
            .execute_streaming_with_retry(
                &breaker,
                cancel,
                decoder,
                || {
                    let transport = Arc::clone(&transport);
                    let request = request.clone();
                    async move { transport.open_stream(request).await }
                },
                on_chunk,
            )
            .await
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("breakers", &self.breakers)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
