use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counts reported by a backend.
///
/// Cache fields are zero when the backend does not report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "inputOther", default)]
    pub input_other: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(rename = "inputCacheRead", default)]
    pub input_cache_read: u64,
    #[serde(rename = "inputCacheCreation", default)]
    pub input_cache_creation: u64,
}

impl TokenUsage {
    pub fn total_input(&self) -> u64 {
        self.input_other + self.input_cache_read + self.input_cache_creation
    }

    pub fn total(&self) -> u64 {
        self.total_input() + self.output
    }

    /// Folds a newer observation in. Fields never decrease.
    pub fn refine(&mut self, observed: TokenUsage) {
        self.input_other = self.input_other.max(observed.input_other);
        self.output = self.output.max(observed.output);
        self.input_cache_read = self.input_cache_read.max(observed.input_cache_read);
        self.input_cache_creation = self.input_cache_creation.max(observed.input_cache_creation);
    }

    pub fn refine_output(&mut self, output: u64) {
        self.output = self.output.max(output);
    }
}

/// One normalized fragment of backend output.
///
/// A `ToolCallDelta` only ever follows the `ToolCall` it continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamedPart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolCallDelta {
        #[serde(rename = "argumentsDelta")]
        arguments_delta: String,
    },
}

impl StreamedPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking {
            text: text.into(),
            signature: None,
        }
    }

    pub fn signature(signature: impl Into<String>) -> Self {
        Self::Thinking {
            text: String::new(),
            signature: Some(signature.into()),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_call_delta(arguments_delta: impl Into<String>) -> Self {
        Self::ToolCallDelta {
            arguments_delta: arguments_delta.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolCallDelta { .. } => "tool_call_delta",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "length")]
    Length,
    #[serde(rename = "toolUse")]
    ToolUse,
    #[serde(rename = "error")]
    Error,
}

/// A server-side context edit reported alongside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEdit {
    pub kind: String,
    #[serde(rename = "clearedToolUses", default)]
    pub cleared_tool_uses: u64,
    #[serde(rename = "clearedInputTokens", default)]
    pub cleared_input_tokens: u64,
}

/// Response metadata an adapter fills in while parts flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub usage: TokenUsage,
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(rename = "contextEdits", default, skip_serializing_if = "Vec::is_empty")]
    pub context_edits: Vec<ContextEdit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// A completed tool invocation. `arguments` is the raw JSON text the model produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// A fully merged part, ready to attach to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletedPart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        signature: Option<String>,
    },
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
    #[serde(rename = "toolCalls", default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(rename = "toolCallId", default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    /// A `tool` message always carries the id of the call it answers.
    pub fn tool_result(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_text(Role::Tool, output)
        }
    }

    /// Builds an assistant message: text and thinking go to `content`,
    /// tool calls to `tool_calls`.
    pub fn assistant_from_parts(parts: Vec<CompletedPart>) -> Self {
        let mut content = Vec::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            match part {
                CompletedPart::Text { text } => content.push(MessageContent::Text { text }),
                CompletedPart::Thinking { text, signature } => {
                    content.push(MessageContent::Thinking { text, signature })
                }
                CompletedPart::ToolCall(call) => tool_calls.push(call),
            }
        }

        Self {
            role: Role::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|content| match content {
                MessageContent::Text { text } => Some(text.as_str()),
                MessageContent::Thinking { .. } => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![MessageContent::Text { text: text.into() }],
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
