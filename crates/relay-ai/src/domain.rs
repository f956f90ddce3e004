//! Provider-neutral conversation history and its one-way mapping to the
//! wire shape every backend payload builder starts from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Message, MessageContent, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRole {
    User,
    Assistant,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolId")]
        tool_id: String,
        input: Value,
    },
    ToolResult {
        #[serde(rename = "toolId")]
        tool_id: String,
        output: String,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMessage {
    pub id: String,
    pub role: DomainRole,
    pub content: Vec<DomainBlock>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl DomainMessage {
    /// Records an assembled assistant message in history.
    ///
    /// Thinking has no domain representation and is left out. Tool arguments
    /// that fail to parse are kept as a JSON string.
    pub fn from_assistant_message(id: impl Into<String>, timestamp: i64, message: &Message) -> Self {
        let mut content = message
            .content
            .iter()
            .filter_map(|content| match content {
                MessageContent::Text { text } => Some(DomainBlock::Text { text: text.clone() }),
                MessageContent::Thinking { .. } => None,
            })
            .collect::<Vec<_>>();

        content.extend(message.tool_calls().iter().map(|call| DomainBlock::ToolUse {
            tool_name: call.name.clone(),
            tool_id: call.id.clone(),
            input: call
                .parse_arguments()
                .unwrap_or_else(|_| Value::String(call.arguments.clone())),
        }));

        let role = match message.role {
            Role::Tool => DomainRole::ToolResult,
            Role::Assistant => DomainRole::Assistant,
            Role::System | Role::User => DomainRole::User,
        };

        Self {
            id: id.into(),
            role,
            content,
            timestamp,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    Text {
        text: String,
    },
    ToolInvocation {
        #[serde(rename = "toolId")]
        tool_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolResult {
        #[serde(rename = "toolId")]
        tool_id: String,
        output: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: Vec<WireBlock>,
}

impl WireMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: WireRole::User,
            content: vec![WireBlock::Text { text: text.into() }],
        }
    }
}

pub fn to_wire_messages(messages: &[DomainMessage]) -> Vec<WireMessage> {
    messages.iter().map(to_wire_message).collect()
}

pub fn to_wire_message(message: &DomainMessage) -> WireMessage {
    let role = match message.role {
        DomainRole::Assistant => WireRole::Assistant,
        DomainRole::User | DomainRole::ToolResult => WireRole::User,
    };
    WireMessage {
        role,
        content: message.content.iter().map(to_wire_block).collect(),
    }
}

fn to_wire_block(block: &DomainBlock) -> WireBlock {
    match block {
        DomainBlock::Text { text } => WireBlock::Text { text: text.clone() },
        DomainBlock::ToolUse {
            tool_name,
            tool_id,
            input,
        } => WireBlock::ToolInvocation {
            tool_id: tool_id.clone(),
            tool_name: tool_name.clone(),
            input: input.clone(),
        },
        DomainBlock::ToolResult {
            tool_id,
            output,
            is_error,
        } => WireBlock::ToolResult {
            tool_id: tool_id.clone(),
            output: output.clone(),
            is_error: *is_error,
        },
    }
}

pub(crate) fn object_or_empty(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        _ => Value::Object(Map::new()),
    }
}
