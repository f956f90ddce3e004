use serde_json::{json, Value};

use crate::config::ProviderSettings;
use crate::domain::{WireBlock, WireMessage, WireRole};
use crate::providers::ProviderRequest;
use crate::types::Tool;

pub(super) fn build_openai_payload(settings: &ProviderSettings, request: &ProviderRequest) -> Value {
    let mut payload = json!({
        "model": settings.model,
        "stream": true,
        "stream_options": { "include_usage": true },
        "messages": convert_messages(request.system.as_deref(), &request.messages),
        "max_tokens": request.max_tokens.unwrap_or(settings.max_tokens),
    });

    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    if !request.tools.is_empty() {
        payload["tools"] = convert_tools(&request.tools);
    }

    payload
}

/// Tool results travel as `tool` role messages, placed ahead of any text the
/// same user turn carries so they directly follow the assistant's calls.
fn convert_messages(system: Option<&str>, messages: &[WireMessage]) -> Vec<Value> {
    let mut converted = Vec::new();

    if let Some(system) = system {
        converted.push(json!({
            "role": "system",
            "content": system,
        }));
    }

    for message in messages {
        match message.role {
            WireRole::User => {
                let mut text_parts = Vec::new();
                for block in &message.content {
                    match block {
                        WireBlock::Text { text } => text_parts.push(text.as_str()),
                        WireBlock::ToolResult {
                            tool_id, output, ..
                        } => converted.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_id,
                            "content": output,
                        })),
                        WireBlock::ToolInvocation { .. } => {}
                    }
                }
                if !text_parts.is_empty() {
                    converted.push(json!({
                        "role": "user",
                        "content": text_parts.join("\n"),
                    }));
                }
            }
            WireRole::Assistant => {
                let mut text_parts = Vec::new();
                let mut tool_calls = Vec::new();
                for block in &message.content {
                    match block {
                        WireBlock::Text { text } => text_parts.push(text.as_str()),
                        WireBlock::ToolInvocation {
                            tool_id,
                            tool_name,
                            input,
                        } => tool_calls.push(json!({
                            "id": tool_id,
                            "type": "function",
                            "function": {
                                "name": tool_name,
                                "arguments": input.to_string(),
                            }
                        })),
                        WireBlock::ToolResult { .. } => {}
                    }
                }

                let mut assistant_message = json!({
                    "role": "assistant",
                    "content": if text_parts.is_empty() { Value::Null } else { Value::String(text_parts.join("\n")) },
                });
                if !tool_calls.is_empty() {
                    assistant_message["tool_calls"] = Value::Array(tool_calls);
                }
                converted.push(assistant_message);
            }
        }
    }

    converted
}

fn convert_tools(tools: &[Tool]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}
