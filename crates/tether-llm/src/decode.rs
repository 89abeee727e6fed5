//! Provider chunk decoders.
//!
//! A [`ChunkDecoder`] converts one decoded event payload ([`RawEventFrame`])
//! into a [`StreamChunk`]. An in-band error event becomes a
//! [`ClassifiedError`] using the same provider tables as HTTP error bodies.

use serde_json::Value;
use tether_core::{
    ClassifiedError, FinishReason, Message, ProviderId, Role, StreamChunk, TokenUsage,
    ToolCallDelta,
};

/// One event payload, parsed as JSON, before conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEventFrame {
    /// SSE `event:` name, if the record had one.
    pub event: Option<String>,
    /// Parsed `data:` payload.
    pub data: Value,
}

/// Converts provider event payloads into stream chunks.
pub trait ChunkDecoder: Send {
    /// Upstream whose wire format this decoder reads.
    fn provider(&self) -> &ProviderId;

    /// Decode one frame.
    fn decode(&mut self, frame: &RawEventFrame) -> Result<StreamChunk, ClassifiedError>;
}

fn u32_field(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_default()
}

fn string_field(value: &Value) -> Option<String> {
    value.as_str().map(String::from)
}

fn copy_metadata(chunk: &mut StreamChunk, source: &Value, keys: &[&str]) {
    for key in keys {
        if let Some(v) = source.get(*key).filter(|v| !v.is_null()) {
            let _ = chunk.metadata.insert((*key).to_string(), v.clone());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI
// ─────────────────────────────────────────────────────────────────────────────

/// Decoder for `OpenAI` chat-completions streams (and compatible APIs).
#[derive(Clone, Debug)]
pub struct OpenAiChunkDecoder {
    provider: ProviderId,
}

impl OpenAiChunkDecoder {
    /// Decoder for `provider`, which must speak the chat-completions format.
    pub fn new(provider: ProviderId) -> Self {
        Self { provider }
    }
}

impl Default for OpenAiChunkDecoder {
    fn default() -> Self {
        Self::new(ProviderId::new("openai"))
    }
}

impl ChunkDecoder for OpenAiChunkDecoder {
    fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn decode(&mut self, frame: &RawEventFrame) -> Result<StreamChunk, ClassifiedError> {
        let data = &frame.data;
        if data.get("error").is_some_and(|e| !e.is_null()) {
            return Err(ClassifiedError::from_payload(self.provider.clone(), data));
        }

        let mut chunk = StreamChunk::default();
        copy_metadata(&mut chunk, data, &["id", "model"]);

        if let Some(choice) = data["choices"].get(0) {
            let delta = &choice["delta"];
            let mut message = Message {
                role: delta["role"].as_str().and_then(Role::parse),
                content: string_field(&delta["content"]),
                thinking: string_field(&delta["reasoning_content"])
                    .or_else(|| string_field(&delta["reasoning"])),
                tool_calls: Vec::new(),
            };
            if let Some(calls) = delta["tool_calls"].as_array() {
                message.tool_calls = calls
                    .iter()
                    .map(|call| ToolCallDelta {
                        index: u32_field(&call["index"]),
                        id: string_field(&call["id"]),
                        name: string_field(&call["function"]["name"]),
                        arguments: string_field(&call["function"]["arguments"]),
                    })
                    .collect();
            }
            if !message.is_empty() {
                chunk.delta = Some(message);
            }
            if let Some(reason) = choice["finish_reason"].as_str().filter(|r| !r.is_empty()) {
                chunk = chunk.finished(FinishReason::parse(reason));
            }
        }

        if let Some(usage) = data.get("usage").filter(|u| u.is_object()) {
            chunk.usage = Some(TokenUsage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or_default(),
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or_default(),
                cache_read_tokens: usage["prompt_tokens_details"]["cached_tokens"].as_u64(),
            });
        }

        Ok(chunk)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic
// ─────────────────────────────────────────────────────────────────────────────

/// Decoder for Anthropic Messages API streams.
///
/// Handles `message_start`, `content_block_start`, `content_block_delta`,
/// `message_delta`, `error`. Everything else (`ping`, `content_block_stop`,
/// `message_stop`, unknown types) yields an empty chunk.
#[derive(Clone, Debug)]
pub struct AnthropicChunkDecoder {
    provider: ProviderId,
}

impl AnthropicChunkDecoder {
    /// Decoder for `provider`, which must speak the Messages format.
    pub fn new(provider: ProviderId) -> Self {
        Self { provider }
    }
}

impl Default for AnthropicChunkDecoder {
    fn default() -> Self {
        Self::new(ProviderId::new("anthropic"))
    }
}

impl ChunkDecoder for AnthropicChunkDecoder {
    fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn decode(&mut self, frame: &RawEventFrame) -> Result<StreamChunk, ClassifiedError> {
        let data = &frame.data;
        let kind = data["type"]
            .as_str()
            .or(frame.event.as_deref())
            .unwrap_or_default();

        let mut chunk = StreamChunk::default();
        match kind {
            "error" => {
                return Err(ClassifiedError::from_payload(self.provider.clone(), data));
            }
            "message_start" => {
                let message = &data["message"];
                copy_metadata(&mut chunk, message, &["id", "model"]);
                chunk.delta = message["role"]
                    .as_str()
                    .and_then(Role::parse)
                    .map(|role| Message {
                        role: Some(role),
                        ..Message::default()
                    });
                let usage = &message["usage"];
                if usage.is_object() {
                    chunk.usage = Some(TokenUsage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or_default(),
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or_default(),
                        cache_read_tokens: usage["cache_read_input_tokens"].as_u64(),
                    });
                }
            }
            "content_block_start" => {
                let block = &data["content_block"];
                let index = u32_field(&data["index"]);
                let message = match block["type"].as_str() {
                    Some("tool_use") => Message {
                        tool_calls: vec![ToolCallDelta {
                            index,
                            id: string_field(&block["id"]),
                            name: string_field(&block["name"]),
                            arguments: None,
                        }],
                        ..Message::default()
                    },
                    Some("text") => Message {
                        content: block["text"].as_str().filter(|t| !t.is_empty()).map(String::from),
                        ..Message::default()
                    },
                    Some("thinking") => Message {
                        thinking: block["thinking"]
                            .as_str()
                            .filter(|t| !t.is_empty())
                            .map(String::from),
                        ..Message::default()
                    },
                    _ => Message::default(),
                };
                if !message.is_empty() {
                    chunk.delta = Some(message);
                }
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                let message = match delta["type"].as_str() {
                    Some("text_delta") => Message {
                        content: string_field(&delta["text"]),
                        ..Message::default()
                    },
                    Some("thinking_delta") => Message {
                        thinking: string_field(&delta["thinking"]),
                        ..Message::default()
                    },
                    Some("input_json_delta") => Message {
                        tool_calls: vec![ToolCallDelta {
                            index: u32_field(&data["index"]),
                            arguments: string_field(&delta["partial_json"]),
                            ..ToolCallDelta::default()
                        }],
                        ..Message::default()
                    },
                    _ => Message::default(),
                };
                if !message.is_empty() {
                    chunk.delta = Some(message);
                }
            }
            "message_delta" => {
                if let Some(reason) = data["delta"]["stop_reason"].as_str().filter(|r| !r.is_empty()) {
                    chunk = chunk.finished(FinishReason::parse(reason));
                }
                let usage = &data["usage"];
                if usage.is_object() {
                    chunk.usage = Some(TokenUsage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or_default(),
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or_default(),
                        cache_read_tokens: usage["cache_read_input_tokens"].as_u64(),
                    });
                }
            }
            _ => {}
        }
        Ok(chunk)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tether_core::ErrorCategory;

    use super::*;

    fn frame(data: Value) -> RawEventFrame {
        RawEventFrame { event: None, data }
    }

    // ── OpenAI ──────────────────────────────────────────────────────

    #[test]
    fn openai_role_frame() {
        let mut d = OpenAiChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "id": "chatcmpl-1", "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
            })))
            .unwrap();
        let delta = chunk.delta.unwrap();
        assert_eq!(delta.role, Some(Role::Assistant));
        assert_eq!(delta.content.as_deref(), Some(""));
        assert!(!chunk.done);
        assert_eq!(chunk.metadata["id"], "chatcmpl-1");
        assert_eq!(chunk.metadata["model"], "gpt-4o");
    }

    #[test]
    fn openai_finish_frame() {
        let mut d = OpenAiChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "choices": [{"delta": {"content": "!"}, "finish_reason": "stop"}]
            })))
            .unwrap();
        assert_eq!(chunk.text(), Some("!"));
        assert!(chunk.done);
        assert_eq!(chunk.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn openai_empty_finish_reason_is_not_done() {
        let mut d = OpenAiChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({"choices": [{"delta": {"content": "a"}, "finish_reason": ""}]})))
            .unwrap();
        assert!(!chunk.done);
        assert!(chunk.finish_reason.is_none());
    }

    #[test]
    fn openai_tool_call_fragments() {
        let mut d = OpenAiChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "choices": [{"delta": {"tool_calls": [
                    {"index": 1, "id": "call_1", "type": "function", "function": {"name": "search", "arguments": "{\"q\""}}
                ]}}]
            })))
            .unwrap();
        let call = &chunk.delta.unwrap().tool_calls[0];
        assert_eq!(call.index, 1);
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.name.as_deref(), Some("search"));
        assert_eq!(call.arguments.as_deref(), Some("{\"q\""));
    }

    #[test]
    fn openai_usage_only_frame() {
        let mut d = OpenAiChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "choices": [],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "prompt_tokens_details": {"cached_tokens": 4}}
            })))
            .unwrap();
        assert!(chunk.delta.is_none());
        let usage = chunk.usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_read_tokens, Some(4));
    }

    #[test]
    fn openai_null_usage_is_absent() {
        let mut d = OpenAiChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({"choices": [{"delta": {"content": "x"}}], "usage": null})))
            .unwrap();
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn openai_error_frame() {
        let mut d = OpenAiChunkDecoder::default();
        let err = d
            .decode(&frame(json!({"error": {"message": "Rate limit reached", "code": "rate_limit_exceeded"}})))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::RateLimit);
        assert_eq!(err.provider().as_str(), "openai");
    }

    // ── Anthropic ───────────────────────────────────────────────────

    #[test]
    fn anthropic_message_start() {
        let mut d = AnthropicChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "type": "message_start",
                "message": {"id": "msg_1", "model": "claude", "role": "assistant",
                            "usage": {"input_tokens": 25, "output_tokens": 1}}
            })))
            .unwrap();
        assert_eq!(chunk.delta.unwrap().role, Some(Role::Assistant));
        assert_eq!(chunk.usage.unwrap().input_tokens, 25);
        assert_eq!(chunk.metadata["id"], "msg_1");
    }

    #[test]
    fn anthropic_text_delta() {
        let mut d = AnthropicChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "type": "content_block_delta", "index": 0,
                "delta": {"type": "text_delta", "text": "Hello"}
            })))
            .unwrap();
        assert_eq!(chunk.text(), Some("Hello"));
    }

    #[test]
    fn anthropic_thinking_delta() {
        let mut d = AnthropicChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "type": "content_block_delta", "index": 0,
                "delta": {"type": "thinking_delta", "thinking": "hmm"}
            })))
            .unwrap();
        assert_eq!(chunk.delta.unwrap().thinking.as_deref(), Some("hmm"));
    }

    #[test]
    fn anthropic_tool_use_block() {
        let mut d = AnthropicChunkDecoder::default();
        let start = d
            .decode(&frame(json!({
                "type": "content_block_start", "index": 2,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "read", "input": {}}
            })))
            .unwrap();
        let call = &start.delta.unwrap().tool_calls[0];
        assert_eq!(call.index, 2);
        assert_eq!(call.name.as_deref(), Some("read"));

        let delta = d
            .decode(&frame(json!({
                "type": "content_block_delta", "index": 2,
                "delta": {"type": "input_json_delta", "partial_json": "{\"path\":"}
            })))
            .unwrap();
        let call = &delta.delta.unwrap().tool_calls[0];
        assert_eq!(call.index, 2);
        assert_eq!(call.arguments.as_deref(), Some("{\"path\":"));
        assert!(call.id.is_none());
    }

    #[test]
    fn anthropic_message_delta_finishes() {
        let mut d = AnthropicChunkDecoder::default();
        let chunk = d
            .decode(&frame(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                "usage": {"output_tokens": 15}
            })))
            .unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.finish_reason, Some(FinishReason::Stop));
        assert_eq!(chunk.usage.unwrap().output_tokens, 15);
    }

    #[test]
    fn anthropic_ping_and_stop_are_empty() {
        let mut d = AnthropicChunkDecoder::default();
        for data in [json!({"type": "ping"}), json!({"type": "message_stop"})] {
            let chunk = d.decode(&frame(data)).unwrap();
            assert!(chunk.delta.is_none());
            assert!(!chunk.done);
        }
    }

    #[test]
    fn anthropic_type_from_event_name() {
        let mut d = AnthropicChunkDecoder::default();
        let chunk = d
            .decode(&RawEventFrame {
                event: Some("content_block_delta".into()),
                data: json!({"index": 0, "delta": {"type": "text_delta", "text": "x"}}),
            })
            .unwrap();
        assert_eq!(chunk.text(), Some("x"));
    }

    #[test]
    fn anthropic_overloaded_error_is_retryable_server() {
        let mut d = AnthropicChunkDecoder::default();
        let err = d
            .decode(&frame(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Server);
        assert!(err.retryable());
    }
}
