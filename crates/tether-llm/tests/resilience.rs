//! End-to-end tests of the resilient client against a local HTTP server.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use tether_core::retry::BackoffKind;
use tether_core::{ErrorCategory, FinishReason, ProviderId};
use tether_llm::{
    AnthropicChunkDecoder, BreakerRegistry, CircuitBreakerConfig, CircuitState, ExecutionError,
    HttpRequest, OpenAiChunkDecoder, ReqwestTransport, ResilientClient, RetryExecutor,
    RetryPolicy, StreamError, TerminalReason,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_PATH: &str = "/v1/chat/completions";

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff: BackoffKind::Exponential,
        jitter: false,
        rate_limit_min_delay: Duration::from_millis(20),
    }
}

fn client(max_attempts: u32, max_failures: u32) -> ResilientClient {
    ResilientClient::new(
        Arc::new(ReqwestTransport::new()),
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig {
            max_failures,
            reset_timeout: Duration::from_secs(60),
        })),
        RetryExecutor::new(fast_policy(max_attempts)),
    )
}

fn chat_request(server: &MockServer) -> HttpRequest {
    HttpRequest::post_json(
        format!("{}{CHAT_PATH}", server.uri()),
        &serde_json::json!({"model": "gpt-test", "stream": true}),
    )
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn retries_server_errors_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "ok"})))
        .mount(&server)
        .await;

    let client = client(3, 10);
    let provider = ProviderId::new("openai");
    let response = client
        .send(&provider, &chat_request(&server), &CancellationToken::new())
        .await
        .unwrap();

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["id"], "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    let breaker = client.breakers().get(&provider).unwrap();
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn exhausts_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"message": "internal", "type": "server_error"}
        })))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(3, 10)
        .send(&ProviderId::new("openai"), &chat_request(&server), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.reason(), TerminalReason::Exhausted);
    assert_eq!(err.attempts(), 3);
    let last = err.last_error().unwrap();
    assert_eq!(last.category(), ErrorCategory::Server);
    assert_eq!(last.http_status(), Some(500));
}

#[tokio::test]
async fn rate_limit_honours_retry_after_and_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .insert_header("x-request-id", "req_42")
                .set_body_json(serde_json::json!({
                    "error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}
                })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let started = Instant::now();
    let err = client(2, 10)
        .send(&ProviderId::new("openai"), &chat_request(&server), &CancellationToken::new())
        .await
        .unwrap_err();

    let last = err.last_error().unwrap();
    assert_eq!(last.category(), ErrorCategory::RateLimit);
    assert!(last.retryable());
    assert_eq!(last.request_id(), Some("req_42"));
    assert_eq!(last.retry_after(), Some(Duration::ZERO));
    // The rate-limit floor still applies when retry-after is zero
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(5, 10)
        .send(&ProviderId::new("openai"), &chat_request(&server), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.reason(), TerminalReason::NonRetryable);
    assert_eq!(err.last_error().unwrap().category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn open_circuit_stops_hitting_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(5, 2);
    let provider = ProviderId::new("openai");

    let first = client
        .send(&provider, &chat_request(&server), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(first.reason(), TerminalReason::CircuitOpen);
    assert_eq!(first.attempts(), 2);

    let second = client
        .send(&provider, &chat_request(&server), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_matches!(second, ExecutionError::CircuitOpen { attempts: 0, .. });
    assert_eq!(client.breakers().get(&provider).unwrap().state(), CircuitState::Open);
}

#[tokio::test]
async fn streams_openai_chunks_in_order() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],",
        "\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let mut text = String::new();
    let summary = client(3, 10)
        .stream(
            &ProviderId::new("openai"),
            &chat_request(&server),
            OpenAiChunkDecoder::default(),
            |chunk| {
                text.push_str(chunk.text().unwrap_or_default());
                Ok::<_, Infallible>(())
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(text, "Hello");
    assert_eq!(summary.chunks, 3);
    assert!(summary.saw_sentinel);
    assert_eq!(summary.finish_reason, Some(FinishReason::Stop));
    let usage = summary.usage.unwrap();
    assert_eq!(usage.input_tokens, 5);
    assert_eq!(usage.output_tokens, 2);
}

#[tokio::test]
async fn stream_open_is_retried_after_overload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse(concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,",
            "\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        )))
        .mount(&server)
        .await;

    let mut text = String::new();
    let summary = client(3, 10)
        .stream(
            &ProviderId::new("anthropic"),
            &chat_request(&server),
            AnthropicChunkDecoder::default(),
            |chunk| {
                text.push_str(chunk.text().unwrap_or_default());
                Ok::<_, Infallible>(())
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(text, "ok");
    assert!(summary.chunks >= 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn in_band_error_event_ends_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"The server had an error\",\"type\":\"server_error\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(3, 10);
    let provider = ProviderId::new("openai");
    let mut text = String::new();
    let err = client
        .stream(
            &provider,
            &chat_request(&server),
            OpenAiChunkDecoder::default(),
            |chunk| {
                text.push_str(chunk.text().unwrap_or_default());
                Ok::<_, Infallible>(())
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(text, "par");
    assert_matches!(err, ExecutionError::Stream { source: StreamError::Upstream(_), .. });
    assert_eq!(err.last_error().unwrap().category(), ErrorCategory::Server);
    assert_eq!(client.breakers().get(&provider).unwrap().consecutive_failures(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_a_slow_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(sse("data: [DONE]\n\n").set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let _ = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let client = client(3, 10);
    let provider = ProviderId::new("openai");
    let err = client
        .stream(
            &provider,
            &chat_request(&server),
            OpenAiChunkDecoder::default(),
            |_| Ok::<_, Infallible>(()),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.breakers().get(&provider).unwrap().consecutive_failures(), 0);
}
