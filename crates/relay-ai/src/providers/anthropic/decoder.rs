use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::providers::WireEventDecoder;
use crate::types::{ContextEdit, ResponseSummary, StopReason, StreamedPart, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Text,
    Thinking,
    ToolUse,
}

/// Decoder for the Messages API event stream.
///
/// Block deltas are only honored for a block index that was opened by a
/// `content_block_start` of the matching kind.
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    blocks: HashMap<u64, BlockState>,
}

impl WireEventDecoder for AnthropicDecoder {
    fn decode(
        &mut self,
        event: &Value,
        summary: &mut ResponseSummary,
    ) -> Result<Vec<StreamedPart>, ProviderError> {
        let Some(event_type) = event.get("type").and_then(Value::as_str) else {
            debug!("skipping anthropic event without `type`");
            return Ok(Vec::new());
        };

        match event_type {
            "message_start" => {
                let message = event.get("message");
                if let Some(id) = message.and_then(|message| message.get("id")).and_then(Value::as_str) {
                    summary.id = Some(id.to_string());
                }
                if let Some(usage) = message.and_then(|message| message.get("usage")) {
                    summary.usage.refine(parse_usage(usage));
                }
                Ok(Vec::new())
            }
            "content_block_start" => Ok(self.start_block(event)),
            "content_block_delta" => Ok(self.apply_delta(event)),
            "content_block_stop" => {
                if let Some(index) = event.get("index").and_then(Value::as_u64) {
                    self.blocks.remove(&index);
                }
                Ok(Vec::new())
            }
            "message_delta" => {
                if let Some(reason) = event
                    .get("delta")
                    .and_then(|delta| delta.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    summary.stop_reason = Some(map_stop_reason(reason));
                }
                if let Some(output) = event
                    .get("usage")
                    .and_then(|usage| usage.get("output_tokens"))
                    .and_then(Value::as_u64)
                {
                    summary.usage.refine_output(output);
                }
                if let Some(management) = event.get("context_management") {
                    summary.context_edits.extend(parse_context_edits(management));
                }
                Ok(Vec::new())
            }
            "message_stop" | "ping" => Ok(Vec::new()),
            "error" => Err(error_from_event(event.get("error").unwrap_or(event))),
            other => {
                debug!(event_type = other, "skipping unknown anthropic event");
                Ok(Vec::new())
            }
        }
    }
}

impl AnthropicDecoder {
    fn start_block(&mut self, event: &Value) -> Vec<StreamedPart> {
        let (Some(index), Some(block)) = (
            event.get("index").and_then(Value::as_u64),
            event.get("content_block"),
        ) else {
            debug!("skipping malformed content_block_start");
            return Vec::new();
        };

        let text_field = |name: &str| {
            block
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                self.blocks.insert(index, BlockState::Text);
                vec![StreamedPart::text(text_field("text"))]
            }
            Some("thinking") => {
                self.blocks.insert(index, BlockState::Thinking);
                let signature = text_field("signature");
                vec![StreamedPart::Thinking {
                    text: text_field("thinking"),
                    signature: (!signature.is_empty()).then_some(signature),
                }]
            }
            Some("tool_use") => {
                self.blocks.insert(index, BlockState::ToolUse);
                vec![StreamedPart::tool_call(
                    text_field("id"),
                    text_field("name"),
                    block.get("input").cloned().unwrap_or_else(|| json!({})),
                )]
            }
            other => {
                debug!(block_type = ?other, "skipping unsupported content block");
                Vec::new()
            }
        }
    }

    fn apply_delta(&mut self, event: &Value) -> Vec<StreamedPart> {
        let (Some(index), Some(delta)) = (
            event.get("index").and_then(Value::as_u64),
            event.get("delta"),
        ) else {
            debug!("skipping malformed content_block_delta");
            return Vec::new();
        };
        let Some(state) = self.blocks.get(&index).copied() else {
            debug!(index, "skipping delta for a block that was never started");
            return Vec::new();
        };
        let field = |name: &str| delta.get(name).and_then(Value::as_str).unwrap_or_default();

        match (state, delta.get("type").and_then(Value::as_str)) {
            (BlockState::Text, Some("text_delta")) => vec![StreamedPart::text(field("text"))],
            (BlockState::Thinking, Some("thinking_delta")) => {
                vec![StreamedPart::thinking(field("thinking"))]
            }
            (BlockState::Thinking, Some("signature_delta")) => {
                vec![StreamedPart::signature(field("signature"))]
            }
            (BlockState::ToolUse, Some("input_json_delta")) => {
                vec![StreamedPart::tool_call_delta(field("partial_json"))]
            }
            (state, delta_type) => {
                debug!(?state, ?delta_type, "skipping delta that does not match its block");
                Vec::new()
            }
        }
    }
}

/// Maps a complete Messages API response, one part per content block.
pub(crate) fn parts_from_message(
    body: &Value,
) -> Result<(Vec<StreamedPart>, ResponseSummary), ProviderError> {
    if body.get("type").and_then(Value::as_str) == Some("error") {
        return Err(error_from_event(body.get("error").unwrap_or(body)));
    }
    let Some(content) = body.get("content").and_then(Value::as_array) else {
        return Err(ProviderError::unclassified(
            "anthropic response has no `content` array",
        ));
    };

    let mut summary = ResponseSummary {
        id: body.get("id").and_then(Value::as_str).map(str::to_string),
        ..ResponseSummary::default()
    };
    if let Some(usage) = body.get("usage") {
        summary.usage = parse_usage(usage);
    }
    summary.stop_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(map_stop_reason);
    if let Some(management) = body.get("context_management") {
        summary.context_edits = parse_context_edits(management);
    }

    let parts = content
        .iter()
        .filter_map(|block| {
            let field = |name: &str| block.get(name).and_then(Value::as_str).map(str::to_string);
            match block.get("type").and_then(Value::as_str) {
                Some("text") => Some(StreamedPart::text(field("text").unwrap_or_default())),
                Some("thinking") => Some(StreamedPart::Thinking {
                    text: field("thinking").unwrap_or_default(),
                    signature: field("signature").filter(|signature| !signature.is_empty()),
                }),
                Some("tool_use") => Some(StreamedPart::tool_call(
                    field("id").unwrap_or_default(),
                    field("name").unwrap_or_default(),
                    block.get("input").cloned().unwrap_or_else(|| json!({})),
                )),
                _ => None,
            }
        })
        .collect();

    Ok((parts, summary))
}

fn parse_usage(usage: &Value) -> TokenUsage {
    let count = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage {
        input_other: count("input_tokens"),
        output: count("output_tokens"),
        input_cache_read: count("cache_read_input_tokens"),
        input_cache_creation: count("cache_creation_input_tokens"),
    }
}

fn parse_context_edits(management: &Value) -> Vec<ContextEdit> {
    management
        .get("applied_edits")
        .and_then(Value::as_array)
        .map(|edits| {
            edits
                .iter()
                .map(|edit| ContextEdit {
                    kind: edit
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    cleared_tool_uses: edit
                        .get("cleared_tool_uses")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    cleared_input_tokens: edit
                        .get("cleared_input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::Length,
        "tool_use" => StopReason::ToolUse,
        "refusal" => StopReason::Error,
        _ => StopReason::Stop,
    }
}

fn error_from_event(error: &Value) -> ProviderError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("anthropic stream error")
        .to_string();
    match error.get("type").and_then(Value::as_str) {
        Some("authentication_error" | "permission_error") => ProviderError::authentication(message),
        Some("rate_limit_error") => ProviderError::RateLimit {
            message,
            retry_after_secs: None,
        },
        Some("overloaded_error") => ProviderError::Status {
            status: 529,
            message,
        },
        _ => ProviderError::unclassified(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(events: &[Value]) -> (Vec<StreamedPart>, ResponseSummary) {
        let mut decoder = AnthropicDecoder::default();
        let mut summary = ResponseSummary::default();
        let mut parts = Vec::new();
        for event in events {
            parts.extend(decoder.decode(event, &mut summary).expect("decode"));
        }
        (parts, summary)
    }

    #[test]
    fn signature_delta_becomes_signed_empty_thinking() {
        let (parts, _) = decode_all(&[
            json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":"","signature":""}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"plan"}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"sig"}}),
        ]);
        assert_eq!(
            parts,
            vec![
                StreamedPart::thinking(""),
                StreamedPart::thinking("plan"),
                StreamedPart::signature("sig"),
            ]
        );
    }

    #[test]
    fn mismatched_and_unstarted_deltas_are_skipped() {
        let (parts, _) = decode_all(&[
            json!({"type":"content_block_delta","index":3,"delta":{"type":"text_delta","text":"x"}}),
            json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}),
        ]);
        assert_eq!(parts, vec![StreamedPart::text("")]);
    }

    #[test]
    fn message_delta_only_refines_output_and_records_context_edits() {
        let (_, summary) = decode_all(&[
            json!({"type":"message_start","message":{"id":"m","usage":{"input_tokens":20,"output_tokens":1,"cache_read_input_tokens":5}}}),
            json!({
                "type":"message_delta",
                "delta":{"stop_reason":"tool_use"},
                "usage":{"input_tokens":0,"output_tokens":42},
                "context_management":{"applied_edits":[{"type":"clear_tool_uses_20250919","cleared_tool_uses":2,"cleared_input_tokens":900}]}
            }),
        ]);
        assert_eq!(summary.usage.input_other, 20);
        assert_eq!(summary.usage.input_cache_read, 5);
        assert_eq!(summary.usage.output, 42);
        assert_eq!(summary.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(summary.context_edits.len(), 1);
        assert_eq!(summary.context_edits[0].cleared_input_tokens, 900);
    }

    #[test]
    fn in_band_errors_are_classified() {
        let mut decoder = AnthropicDecoder::default();
        let mut summary = ResponseSummary::default();
        let error = decoder
            .decode(
                &json!({"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}),
                &mut summary,
            )
            .expect_err("error event");
        assert_eq!(error.status(), Some(529));
    }
}
