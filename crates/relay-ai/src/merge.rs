use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::types::{CompletedPart, Message, StreamedPart, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("thinking part is already signed")]
    SignatureTerminal,
    #[error("cannot merge a {incoming} part into a {target} part")]
    Incompatible {
        target: &'static str,
        incoming: &'static str,
    },
}

/// Accumulates the raw argument JSON of one tool call.
///
/// The buffer is only valid JSON after the last delta for the call has been
/// appended.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallBuilder {
    id: String,
    name: String,
    input: Value,
    arguments_json: String,
}

impl ToolCallBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            arguments_json: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments_json(&self) -> &str {
        &self.arguments_json
    }

    pub fn push_arguments(&mut self, fragment: &str) {
        self.arguments_json.push_str(fragment);
    }

    /// Calls that never received a delta fall back to their initial input.
    /// A string input is argument text that never parsed and is kept as is.
    pub fn finish(self) -> ToolCall {
        let arguments = if !self.arguments_json.is_empty() {
            self.arguments_json
        } else {
            match self.input {
                Value::Null => "{}".to_string(),
                Value::String(raw) => raw,
                input => input.to_string(),
            }
        };
        ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

/// A part that later deltas may still extend.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeablePart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        signature: Option<String>,
    },
    ToolCall(ToolCallBuilder),
}

impl MergeablePart {
    /// Opens a part. Deltas cannot open anything.
    pub fn open(part: StreamedPart) -> Option<Self> {
        match part {
            StreamedPart::Text { text } => Some(Self::Text { text }),
            StreamedPart::Thinking { text, signature } => Some(Self::Thinking { text, signature }),
            StreamedPart::ToolCall { id, name, input } => {
                Some(Self::ToolCall(ToolCallBuilder::new(id, name, input)))
            }
            StreamedPart::ToolCallDelta { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall(_) => "tool_call",
        }
    }

    /// Folds `part` into `self`. On error `self` is left untouched.
    pub fn merge(&mut self, part: &StreamedPart) -> Result<(), MergeError> {
        match (self, part) {
            (Self::Text { text }, StreamedPart::Text { text: more }) => {
                text.push_str(more);
                Ok(())
            }
            (
                Self::Thinking { text, signature },
                StreamedPart::Thinking {
                    text: more,
                    signature: incoming,
                },
            ) => {
                if signature.is_some() {
                    return Err(MergeError::SignatureTerminal);
                }
                text.push_str(more);
                if let Some(incoming) = incoming {
                    *signature = Some(incoming.clone());
                }
                Ok(())
            }
            (Self::ToolCall(builder), StreamedPart::ToolCallDelta { arguments_delta }) => {
                builder.push_arguments(arguments_delta);
                Ok(())
            }
            (target, incoming) => Err(MergeError::Incompatible {
                target: target.kind(),
                incoming: incoming.kind(),
            }),
        }
    }

    /// Empty text and unsigned empty thinking carry nothing and are dropped.
    pub fn complete(self) -> Option<CompletedPart> {
        match self {
            Self::Text { text } if text.is_empty() => None,
            Self::Text { text } => Some(CompletedPart::Text { text }),
            Self::Thinking { text, signature } if text.is_empty() && signature.is_none() => None,
            Self::Thinking { text, signature } => Some(CompletedPart::Thinking { text, signature }),
            Self::ToolCall(builder) => Some(CompletedPart::ToolCall(builder.finish())),
        }
    }
}

/// Folds an ordered part sequence into completed parts.
#[derive(Debug, Default)]
pub struct PartMerger {
    open: Option<MergeablePart>,
    completed: Vec<CompletedPart>,
    dropped_deltas: usize,
}

impl PartMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: StreamedPart) {
        if let Some(open) = self.open.as_mut() {
            match open.merge(&part) {
                Ok(()) => return,
                Err(MergeError::SignatureTerminal) => {
                    debug!("thinking part already signed; starting a new one");
                }
                Err(MergeError::Incompatible { .. }) => {}
            }
        }

        if matches!(part, StreamedPart::ToolCallDelta { .. }) {
            self.dropped_deltas += 1;
            debug!(
                open = ?self.open.as_ref().map(MergeablePart::kind),
                "dropping tool_call_delta with no open tool call"
            );
            return;
        }

        self.close_open();
        self.open = MergeablePart::open(part);
    }

    pub fn open_part(&self) -> Option<&MergeablePart> {
        self.open.as_ref()
    }

    pub fn completed(&self) -> &[CompletedPart] {
        &self.completed
    }

    pub fn dropped_deltas(&self) -> usize {
        self.dropped_deltas
    }

    pub fn finish(mut self) -> Vec<CompletedPart> {
        self.close_open();
        self.completed
    }

    pub fn finish_message(self) -> Message {
        Message::assistant_from_parts(self.finish())
    }

    fn close_open(&mut self) {
        if let Some(completed) = self.open.take().and_then(MergeablePart::complete) {
            self.completed.push(completed);
        }
    }
}

pub fn merge_parts(parts: impl IntoIterator<Item = StreamedPart>) -> Vec<CompletedPart> {
    let mut merger = PartMerger::new();
    for part in parts {
        merger.push(part);
    }
    merger.finish()
}

pub fn assemble_message(parts: impl IntoIterator<Item = StreamedPart>) -> Message {
    Message::assistant_from_parts(merge_parts(parts))
}
