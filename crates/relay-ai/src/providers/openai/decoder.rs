use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::providers::WireEventDecoder;
use crate::types::{ResponseSummary, StopReason, StreamedPart, TokenUsage};

/// Per-index tool call state. Argument fragments are held back until the
/// call can be opened.
#[derive(Debug, Default)]
struct ToolCallSlot {
    id: Option<String>,
    name: Option<String>,
    opened: bool,
    held_arguments: String,
}

/// Decoder for Chat Completions stream chunks.
///
/// Only one tool call streams live at a time: parallel calls are held and
/// released whole, in index order, once the choice finishes or the stream
/// ends, so a delta always follows the call it belongs to.
#[derive(Debug, Default)]
pub struct OpenAiDecoder {
    tool_calls: BTreeMap<u64, ToolCallSlot>,
    live: Option<u64>,
}

impl WireEventDecoder for OpenAiDecoder {
    fn decode(
        &mut self,
        event: &Value,
        summary: &mut ResponseSummary,
    ) -> Result<Vec<StreamedPart>, ProviderError> {
        if let Some(error) = event.get("error") {
            return Err(error_from_body(error));
        }

        if summary.id.is_none() {
            summary.id = event.get("id").and_then(Value::as_str).map(str::to_string);
        }
        if let Some(usage) = event.get("usage").filter(|usage| usage.is_object()) {
            summary.usage.refine(parse_usage(usage));
        }

        let Some(choice) = event
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return Ok(Vec::new());
        };

        let finished = choice.get("finish_reason").and_then(Value::as_str);
        if let Some(reason) = finished {
            summary.stop_reason = Some(map_stop_reason(reason));
        }

        let mut parts = Vec::new();
        if let Some(delta) = choice.get("delta") {
            if let Some(reasoning) = reasoning_text(delta).filter(|text| !text.is_empty()) {
                parts.push(StreamedPart::thinking(reasoning));
            }
            if let Some(text) = delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
            {
                parts.push(StreamedPart::text(text));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    self.apply_tool_call(call, &mut parts);
                }
            }
        }
        if finished.is_some() {
            self.release_held_calls(&mut parts);
        }
        Ok(parts)
    }

    fn finish(&mut self) -> Vec<StreamedPart> {
        let mut parts = Vec::new();
        self.release_held_calls(&mut parts);
        parts
    }
}

impl OpenAiDecoder {
    fn apply_tool_call(&mut self, call: &Value, parts: &mut Vec<StreamedPart>) {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let slot = self.tool_calls.entry(index).or_default();

        if let Some(id) = call.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
            slot.id = Some(id.to_string());
        }
        let function = call.get("function");
        if let Some(name) = function
            .and_then(|function| function.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
        {
            slot.name = Some(name.to_string());
        }
        let fragment = function
            .and_then(|function| function.get("arguments"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        if self.live == Some(index) {
            if !fragment.is_empty() {
                parts.push(StreamedPart::tool_call_delta(fragment));
            }
            return;
        }
        if slot.opened {
            debug!(index, "dropping arguments for an already released tool call");
            return;
        }

        slot.held_arguments.push_str(fragment);
        if self.live.is_some() {
            debug!(index, "holding arguments of a parallel tool call");
            return;
        }
        if slot.id.is_none() {
            debug!(index, "holding tool call arguments until the call id arrives");
            return;
        }
        self.live = Some(index);
        open_slot(slot, parts);
    }

    fn release_held_calls(&mut self, parts: &mut Vec<StreamedPart>) {
        for (index, slot) in self.tool_calls.iter_mut().filter(|(_, slot)| !slot.opened) {
            if slot.id.is_none() {
                debug!(index, "dropping tool call that never received an id");
                slot.opened = true;
                continue;
            }
            open_slot(slot, parts);
        }
        self.live = None;
    }
}

fn open_slot(slot: &mut ToolCallSlot, parts: &mut Vec<StreamedPart>) {
    slot.opened = true;
    parts.push(StreamedPart::tool_call(
        slot.id.clone().unwrap_or_default(),
        slot.name.clone().unwrap_or_default(),
        json!({}),
    ));
    if !slot.held_arguments.is_empty() {
        parts.push(StreamedPart::tool_call_delta(std::mem::take(
            &mut slot.held_arguments,
        )));
    }
}

/// Maps a complete chat completion. Arguments that parse become the call's
/// input; anything else is passed through verbatim as a delta.
pub(crate) fn parts_from_completion(
    body: &Value,
) -> Result<(Vec<StreamedPart>, ResponseSummary), ProviderError> {
    if let Some(error) = body.get("error") {
        return Err(error_from_body(error));
    }
    let Some(choice) = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return Err(ProviderError::unclassified(
            "openai response has no `choices`",
        ));
    };

    let summary = ResponseSummary {
        id: body.get("id").and_then(Value::as_str).map(str::to_string),
        usage: body.get("usage").map(parse_usage).unwrap_or_default(),
        stop_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(map_stop_reason),
        context_edits: Vec::new(),
    };

    let mut parts = Vec::new();
    let Some(message) = choice.get("message") else {
        return Ok((parts, summary));
    };
    if let Some(reasoning) = reasoning_text(message).filter(|text| !text.is_empty()) {
        parts.push(StreamedPart::thinking(reasoning));
    }
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        parts.push(StreamedPart::text(text));
    }
    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let function = call.get("function");
        let field = |value: Option<&Value>, name: &str| {
            value
                .and_then(|value| value.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let arguments = field(function, "arguments");
        let parsed = if arguments.trim().is_empty() {
            Some(json!({}))
        } else {
            serde_json::from_str::<Value>(&arguments).ok()
        };
        let id = field(Some(call), "id");
        let name = field(function, "name");
        let input = parsed.unwrap_or(Value::String(arguments));
        parts.push(StreamedPart::tool_call(id, name, input));
    }

    Ok((parts, summary))
}

fn reasoning_text(value: &Value) -> Option<&str> {
    value
        .get("reasoning_content")
        .or_else(|| value.get("reasoning"))
        .and_then(Value::as_str)
}

fn parse_usage(usage: &Value) -> TokenUsage {
    let count = |value: Option<&Value>| value.and_then(Value::as_u64).unwrap_or(0);
    let prompt = count(usage.get("prompt_tokens"));
    let cached = count(
        usage
            .get("prompt_tokens_details")
            .and_then(|details| details.get("cached_tokens")),
    );
    TokenUsage {
        input_other: prompt.saturating_sub(cached),
        output: count(usage.get("completion_tokens")),
        input_cache_read: cached,
        input_cache_creation: 0,
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::Length,
        "function_call" | "tool_calls" => StopReason::ToolUse,
        "content_filter" => StopReason::Error,
        _ => StopReason::Stop,
    }
}

fn error_from_body(error: &Value) -> ProviderError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    match error.get("code").and_then(Value::as_str) {
        Some("invalid_api_key") => ProviderError::authentication(message),
        Some("rate_limit_exceeded") => ProviderError::RateLimit {
            message,
            retry_after_secs: None,
        },
        _ => ProviderError::unclassified(message),
    }
}
