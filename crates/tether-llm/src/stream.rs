//! # Stream Processor
//!
//! Drives a [`ChunkDecoder`] over a live byte stream:
//!
//! 1. Buffers bytes until complete lines are available
//! 2. Assembles lines into event records
//! 3. Parses each record's data as JSON and decodes it into a [`StreamChunk`]
//! 4. Hands each chunk to the consumer callback before reading further
//!
//! The loop stops at the `[DONE]` sentinel, on the first consumer error,
//! on an in-band provider error, or when the cancellation token fires
//! (including while waiting on the transport). Records that are not valid
//! JSON are skipped with a warning.

use std::ops::ControlFlow;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tether_core::{FinishReason, StreamChunk, TokenUsage, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::decode::{ChunkDecoder, RawEventFrame};
use crate::error::{BoxError, StreamError};
use crate::sse::{EventRecord, LineBuffer, RecordAssembler};

/// Longest payload excerpt included in malformed-frame warnings.
const DATA_PREVIEW_CHARS: usize = 100;

/// Outcome of a completed stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    /// Chunks delivered to the consumer.
    pub chunks: usize,
    /// Whether the stream ended with the `[DONE]` sentinel.
    pub saw_sentinel: bool,
    /// Records skipped because they were not valid JSON.
    pub skipped: usize,
    /// Finish reason of the last finishing chunk.
    pub finish_reason: Option<FinishReason>,
    /// Usage merged across every chunk that reported any.
    pub usage: Option<TokenUsage>,
}

impl StreamSummary {
    fn record(&mut self, chunk: &StreamChunk) {
        self.chunks += 1;
        if let Some(reason) = &chunk.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        if let Some(usage) = chunk.usage {
            let merged = self.usage.get_or_insert_with(TokenUsage::default);
            if usage.input_tokens > 0 {
                merged.input_tokens = usage.input_tokens;
            }
            if usage.output_tokens > 0 {
                merged.output_tokens = usage.output_tokens;
            }
            if usage.cache_read_tokens.is_some() {
                merged.cache_read_tokens = usage.cache_read_tokens;
            }
        }
    }
}

/// Turns a provider byte stream into consumer callbacks.
#[derive(Debug)]
pub struct StreamProcessor<D> {
    decoder: D,
}

impl<D: ChunkDecoder> StreamProcessor<D> {
    /// Create a processor around `decoder`.
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    /// The wrapped decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Consume `body`, invoking `on_chunk` once per decoded record in order.
    ///
    /// `on_chunk` runs before the next byte is read, so a slow consumer slows
    /// the read loop rather than growing a queue.
    pub async fn process<S, F, E>(
        &mut self,
        mut body: S,
        mut on_chunk: F,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary, StreamError>
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
        F: FnMut(StreamChunk) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let mut lines = LineBuffer::default();
        let mut records = RecordAssembler::default();
        let mut summary = StreamSummary::default();

        loop {
            while let Some(line) = lines.next_line() {
                if let Some(record) = assemble(&mut records, &line) {
                    if cancel.is_cancelled() {
                        return Err(StreamError::Cancelled);
                    }
                    if self.dispatch(record, &mut on_chunk, &mut summary)?.is_break() {
                        return Ok(summary);
                    }
                }
            }

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(StreamError::Cancelled),
                next = body.next() => next,
            };
            match next {
                Some(Ok(bytes)) => lines.push(&bytes),
                Some(Err(e)) => {
                    warn!(provider = %self.decoder.provider(), error = %e, "stream read failed");
                    return Err(StreamError::Transport(e));
                }
                None => break,
            }
        }

        // Transport closed: flush an unterminated final record
        let tail = lines
            .take_remainder()
            .and_then(|line| assemble(&mut records, &line))
            .or_else(|| records.finish());
        if let Some(record) = tail {
            if self.dispatch(record, &mut on_chunk, &mut summary)?.is_break() {
                return Ok(summary);
            }
        }

        if summary.chunks == 0 && !summary.saw_sentinel {
            return Err(StreamError::Empty);
        }
        debug!(
            provider = %self.decoder.provider(),
            chunks = summary.chunks,
            skipped = summary.skipped,
            "stream closed without sentinel"
        );
        Ok(summary)
    }

    fn dispatch<F, E>(
        &mut self,
        record: EventRecord,
        on_chunk: &mut F,
        summary: &mut StreamSummary,
    ) -> Result<ControlFlow<()>, StreamError>
    where
        F: FnMut(StreamChunk) -> Result<(), E>,
        E: Into<BoxError>,
    {
        if record.is_done() {
            summary.saw_sentinel = true;
            return Ok(ControlFlow::Break(()));
        }

        let data = match serde_json::from_str(&record.data) {
            Ok(data) => data,
            Err(e) => {
                summary.skipped += 1;
                warn!(
                    provider = %self.decoder.provider(),
                    error = %e,
                    data_preview = %record.data.chars().take(DATA_PREVIEW_CHARS).collect::<String>(),
                    "skipping malformed stream frame"
                );
                return Ok(ControlFlow::Continue(()));
            }
        };

        let frame = RawEventFrame {
            event: record.event,
            data,
        };
        let mut chunk = self.decoder.decode(&frame).map_err(|e| {
            warn!(provider = %self.decoder.provider(), error = %e, "upstream error event");
            StreamError::Upstream(e)
        })?;
        if let Some(event) = frame.event {
            let _ = chunk
                .metadata
                .entry("event".to_string())
                .or_insert(serde_json::Value::String(event));
        }

        summary.record(&chunk);
        on_chunk(chunk).map_err(|e| StreamError::Consumer(e.into()))?;
        Ok(ControlFlow::Continue(()))
    }
}

/// Feed one raw line to the assembler, skipping lines that are not UTF-8.
fn assemble(records: &mut RecordAssembler, line: &[u8]) -> Option<EventRecord> {
    match std::str::from_utf8(line) {
        Ok(line) => records.push_line(line),
        Err(e) => {
            warn!(error = %e, len = line.len(), "skipping non-UTF-8 stream line");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use tether_core::logging::capture_logs;
    use tether_core::{ErrorCategory, TransportErrorKind};

    use super::*;
    use crate::decode::{AnthropicChunkDecoder, OpenAiChunkDecoder};

    type Body = futures::stream::Iter<std::vec::IntoIter<Result<Bytes, TransportError>>>;

    fn body(parts: &[&[u8]]) -> Body {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::copy_from_slice(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn hi_stream() -> String {
        [
            r#"data: {"choices":[{"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"!"},"finish_reason":"stop"}]}"#,
            "",
            "data: [DONE]",
            "",
            "",
        ]
        .join("\n")
    }

    async fn collect<S>(stream: S) -> Result<(Vec<StreamChunk>, StreamSummary), StreamError>
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
    {
        let mut chunks = Vec::new();
        let summary = StreamProcessor::new(OpenAiChunkDecoder::default())
            .process(
                stream,
                |c| {
                    chunks.push(c);
                    Ok::<_, Infallible>(())
                },
                &CancellationToken::new(),
            )
            .await?;
        Ok((chunks, summary))
    }

    #[tokio::test]
    async fn hi_scenario() {
        let input = hi_stream();
        let (chunks, summary) = collect(body(&[input.as_bytes()])).await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].delta.as_ref().unwrap().role, Some(tether_core::Role::Assistant));
        assert_eq!(chunks[1].text(), Some("Hi"));
        assert!(!chunks[1].done);
        assert_eq!(chunks[2].text(), Some("!"));
        assert!(chunks[2].done);
        assert_eq!(chunks[2].finish_reason, Some(FinishReason::Stop));
        assert!(summary.saw_sentinel);
        assert_eq!(summary.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn sentinel_stops_reading() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let parts: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n")),
        ];
        let stream = futures::stream::iter(parts).inspect(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        let (chunks, summary) = collect(stream).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(summary.saw_sentinel);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn n_records_then_sentinel_yield_n_chunks_in_order() {
        let mut input = String::new();
        for i in 0..25 {
            input.push_str(&format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{i}\"}}}}]}}\n\n"));
        }
        input.push_str("data: [DONE]\n\n");

        let (chunks, _) = collect(body(&[input.as_bytes()])).await.unwrap();
        let texts: Vec<_> = chunks.iter().map(|c| c.text().unwrap().to_string()).collect();
        let expected: Vec<_> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn every_split_point_yields_identical_chunks() {
        let input = hi_stream().replace("Hi", "Hé→").into_bytes();
        let (baseline, _) = collect(body(&[&input[..]])).await.unwrap();

        for split in 0..=input.len() {
            let (chunks, _) = collect(body(&[&input[..split], &input[split..]])).await.unwrap();
            assert_eq!(chunks, baseline, "split at {split}");
        }
    }

    proptest! {
        #[test]
        fn arbitrary_fragmentation_is_transparent(cuts in proptest::collection::vec(0usize..400, 0..12)) {
            let input = hi_stream().replace("Hi", "¡Hola, 世界!").into_bytes();
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (input.len() + 1)).collect();
            cuts.sort_unstable();
            cuts.dedup();

            let mut parts: Vec<&[u8]> = Vec::new();
            let mut start = 0;
            for cut in cuts {
                parts.push(&input[start..cut]);
                start = cut;
            }
            parts.push(&input[start..]);

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (baseline, _) = runtime.block_on(collect(body(&[&input[..]]))).unwrap();
            let (chunks, _) = runtime.block_on(collect(body(&parts))).unwrap();
            prop_assert_eq!(chunks, baseline);
        }
    }

    #[tokio::test]
    async fn comments_and_crlf() {
        let input = ": OPENROUTER PROCESSING\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n";
        let (chunks, _) = collect(body(&[input.as_bytes()])).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), Some("x"));
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_with_warning() {
        let (logs, _guard) = capture_logs();
        let input = "data: {not json\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n";
        let (chunks, summary) = collect(body(&[input.as_bytes()])).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), Some("ok"));
        assert_eq!(summary.skipped, 1);
        assert!(logs.has_event(tracing::Level::WARN, "skipping malformed stream frame"));
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped() {
        let mut input = b"data: \xff\xfe\n\n".to_vec();
        input.extend_from_slice(b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n");
        let (chunks, _) = collect(body(&[&input[..]])).await.unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn consumer_error_stops_reading() {
        let input = hi_stream();
        let mut seen = 0;
        let err = StreamProcessor::new(OpenAiChunkDecoder::default())
            .process(
                body(&[input.as_bytes()]),
                |_| {
                    seen += 1;
                    if seen == 2 { Err("consumer full") } else { Ok(()) }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, StreamError::Consumer(e) if e.to_string() == "consumer full");
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_bytes() {
        let cancel = CancellationToken::new();
        let first: Result<Bytes, TransportError> =
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n"));
        let stream = futures::stream::iter(vec![first]).chain(futures::stream::pending());

        let trigger = cancel.clone();
        let mut received = 0;
        let err = StreamProcessor::new(OpenAiChunkDecoder::default())
            .process(
                Box::pin(stream),
                |_| {
                    received += 1;
                    trigger.cancel();
                    Ok::<_, Infallible>(())
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert_matches!(err, StreamError::Cancelled);
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_reads_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = hi_stream();
        let mut received = 0;
        let err = StreamProcessor::new(OpenAiChunkDecoder::default())
            .process(
                body(&[input.as_bytes()]),
                |_| {
                    received += 1;
                    Ok::<_, Infallible>(())
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert_matches!(err, StreamError::Cancelled);
        assert_eq!(received, 0);
    }

    #[tokio::test]
    async fn close_after_chunks_without_sentinel_is_ok() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n";
        let (chunks, summary) = collect(body(&[input.as_bytes()])).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(!summary.saw_sentinel);
    }

    #[tokio::test]
    async fn unterminated_final_record_is_flushed() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let (chunks, _) = collect(body(&[input.as_bytes()])).await.unwrap();
        assert_eq!(chunks[0].text(), Some("tail"));
    }

    #[tokio::test]
    async fn close_without_any_chunk_is_empty_error() {
        let err = collect(body(&[b": keep-alive\n\n".as_slice()])).await.unwrap_err();
        assert_matches!(err, StreamError::Empty);
    }

    #[tokio::test]
    async fn transport_error_mid_stream() {
        let parts: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Err(TransportError::new(TransportErrorKind::Body, "connection reset")),
        ];
        let err = collect(futures::stream::iter(parts)).await.unwrap_err();
        assert_matches!(err, StreamError::Transport(e) if e.kind() == TransportErrorKind::Body);
    }

    #[tokio::test]
    async fn anthropic_stream_with_event_names_and_error() {
        let input = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"role\":\"assistant\",\"usage\":{\"input_tokens\":9,\"output_tokens\":0}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        let mut chunks = Vec::new();
        let err = StreamProcessor::new(AnthropicChunkDecoder::default())
            .process(
                body(&[input.as_bytes()]),
                |c| {
                    chunks.push(c);
                    Ok::<_, Infallible>(())
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata["event"], "message_start");
        assert_eq!(chunks[1].text(), Some("Hel"));
        assert_matches!(err, StreamError::Upstream(e) if e.category() == ErrorCategory::Server);
    }

    #[tokio::test]
    async fn anthropic_usage_is_merged() {
        let input = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"role\":\"assistant\",\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":12}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let summary = StreamProcessor::new(AnthropicChunkDecoder::default())
            .process(body(&[input.as_bytes()]), |_| Ok::<_, Infallible>(()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.finish_reason, Some(FinishReason::Stop));
        let usage = summary.usage.unwrap();
        assert_eq!(usage.input_tokens, 9);
        assert_eq!(usage.output_tokens, 12);
    }
}
