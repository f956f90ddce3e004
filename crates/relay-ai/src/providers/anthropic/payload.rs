use serde_json::{json, Value};

use crate::config::ProviderSettings;
use crate::domain::{object_or_empty, WireBlock, WireMessage, WireRole};
use crate::providers::ProviderRequest;
use crate::types::Tool;

pub(super) fn build_anthropic_payload(
    settings: &ProviderSettings,
    request: &ProviderRequest,
) -> Value {
    let mut payload = json!({
        "model": settings.model,
        "stream": true,
        "messages": convert_messages(&request.messages),
        "max_tokens": request.max_tokens.unwrap_or(settings.max_tokens),
    });

    if let Some(system) = &request.system {
        payload["system"] = Value::String(system.clone());
    }
    if !request.tools.is_empty() {
        payload["tools"] = convert_tools(&request.tools);
    }
    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(budget) = settings.thinking_budget {
        payload["thinking"] = json!({
            "type": "enabled",
            "budget_tokens": budget,
        });
    }

    payload
}

fn convert_messages(messages: &[WireMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                WireRole::User => "user",
                WireRole::Assistant => "assistant",
            };
            json!({
                "role": role,
                "content": message.content.iter().map(convert_block).collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn convert_block(block: &WireBlock) -> Value {
    match block {
        WireBlock::Text { text } => json!({
            "type": "text",
            "text": text,
        }),
        WireBlock::ToolInvocation {
            tool_id,
            tool_name,
            input,
        } => json!({
            "type": "tool_use",
            "id": tool_id,
            "name": tool_name,
            "input": object_or_empty(input),
        }),
        WireBlock::ToolResult {
            tool_id,
            output,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_id,
            "content": output,
            "is_error": is_error,
        }),
    }
}

fn convert_tools(tools: &[Tool]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn tool_invocation_input_is_always_an_object() {
        let request = ProviderRequest {
            messages: vec![WireMessage {
                role: WireRole::Assistant,
                content: vec![WireBlock::ToolInvocation {
                    tool_id: "tu_1".to_string(),
                    tool_name: "read".to_string(),
                    input: Value::String("{broken".to_string()),
                }],
            }],
            ..ProviderRequest::default()
        };
        let settings = ProviderSettings::new(ProviderKind::Anthropic, "claude-test");

        let payload = build_anthropic_payload(&settings, &request);
        assert_eq!(payload["messages"][0]["content"][0]["input"], json!({}));
        assert_eq!(payload["max_tokens"], json!(settings.max_tokens));
        assert!(payload.get("thinking").is_none());
    }

    #[test]
    fn thinking_budget_enables_extended_thinking() {
        let mut settings = ProviderSettings::new(ProviderKind::Anthropic, "claude-test");
        settings.thinking_budget = Some(2048);
        let payload = build_anthropic_payload(&settings, &ProviderRequest::default());
        assert_eq!(
            payload["thinking"],
            json!({ "type": "enabled", "budget_tokens": 2048 })
        );
    }
}
