use relay_ai::{ContextEdit, Message, StopReason, StreamError, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything observers learn about an agent run.
///
/// `agent_start` comes first and, on success, `agent_end` last. Every
/// `tool_start` precedes the `tool_end` with the same `toolId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStart {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    AgentEnd {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    TurnStart {
        turn: u32,
    },
    TurnEnd {
        turn: u32,
        #[serde(rename = "stopReason", default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
    },
    MessageStart {
        turn: u32,
    },
    MessageDelta {
        text: String,
    },
    MessageEnd {
        message: Message,
        #[serde(rename = "responseId", default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
        #[serde(rename = "stopReason", default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
    },
    ToolStart {
        #[serde(rename = "toolId")]
        tool_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolEnd {
        #[serde(rename = "toolId")]
        tool_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        output: String,
        #[serde(rename = "isError")]
        is_error: bool,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    Thinking {
        text: String,
    },
    Error {
        kind: String,
        message: String,
    },
    Usage {
        usage: TokenUsage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    ContextManagement {
        edits: Vec<ContextEdit>,
    },
    TodoReminder {
        message: String,
    },
    ContextCompact {
        #[serde(rename = "tokensBefore")]
        tokens_before: u64,
        #[serde(rename = "tokensAfter")]
        tokens_after: u64,
    },
}

impl AgentEvent {
    /// The synthesized event a failed or cancelled stream delivers.
    pub fn from_stream_error(error: &StreamError) -> Self {
        let kind = match error {
            StreamError::Cancelled => "cancelled",
            StreamError::Provider(error) => error.kind(),
        };
        Self::Error {
            kind: kind.to_string(),
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::TurnStart { .. } => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Thinking { .. } => "thinking",
            Self::Error { .. } => "error",
            Self::Usage { .. } => "usage",
            Self::ContextManagement { .. } => "context_management",
            Self::TodoReminder { .. } => "todo_reminder",
            Self::ContextCompact { .. } => "context_compact",
        }
    }
}
