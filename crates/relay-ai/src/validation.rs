use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::DomainBlock;
use crate::types::{Tool, ToolCall};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockViolation {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<BlockViolation>>,
}

/// Structural check over assistant-produced blocks. Reports every violation.
pub fn validate_blocks(blocks: &[DomainBlock]) -> ValidationReport {
    let mut errors = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        let mut violation = |message: String| errors.push(BlockViolation { index, message });
        match block {
            DomainBlock::Text { .. } => {}
            DomainBlock::ToolUse {
                tool_name,
                tool_id,
                input,
            } => {
                if tool_id.is_empty() {
                    violation("tool_use block has an empty toolId".to_string());
                }
                if tool_name.is_empty() {
                    violation("tool_use block has an empty toolName".to_string());
                }
                if !input.is_object() {
                    violation(format!(
                        "tool_use input must be an object, got {}",
                        json_type_name(input)
                    ));
                }
            }
            DomainBlock::ToolResult { tool_id, .. } => {
                if tool_id.is_empty() {
                    violation("tool_result block has an empty toolId".to_string());
                }
            }
        }
    }

    if errors.is_empty() {
        ValidationReport {
            valid: true,
            errors: None,
        }
    } else {
        ValidationReport {
            valid: false,
            errors: Some(errors),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolArgumentError {
    #[error("tool '{name}' not found (available: {})", available.join(", "))]
    ToolNotFound { name: String, available: Vec<String> },
    #[error("invalid JSON schema for tool '{tool}': {message}")]
    SchemaInvalid { tool: String, message: String },
    #[error("arguments for tool call '{call_id}' are not valid JSON: {message}")]
    NotJson { call_id: String, message: String },
    #[error("validation failed for tool '{tool}' ({} violation(s))", violations.len())]
    Invalid {
        tool: String,
        call_id: String,
        violations: Vec<SchemaViolation>,
    },
}

/// Checks a completed call against the schema of the tool it names.
pub fn validate_tool_call(tools: &[Tool], call: &ToolCall) -> Result<Value, ToolArgumentError> {
    let Some(tool) = tools.iter().find(|tool| tool.name == call.name) else {
        return Err(ToolArgumentError::ToolNotFound {
            name: call.name.clone(),
            available: tools.iter().map(|tool| tool.name.clone()).collect(),
        });
    };
    let arguments = call
        .parse_arguments()
        .map_err(|error| ToolArgumentError::NotJson {
            call_id: call.id.clone(),
            message: error.to_string(),
        })?;
    validate_tool_arguments(tool, &call.id, arguments)
}

pub fn validate_tool_arguments(
    tool: &Tool,
    call_id: &str,
    arguments: Value,
) -> Result<Value, ToolArgumentError> {
    let compiled =
        JSONSchema::compile(&tool.parameters).map_err(|error| ToolArgumentError::SchemaInvalid {
            tool: tool.name.clone(),
            message: error.to_string(),
        })?;

    if let Err(errors) = compiled.validate(&arguments) {
        let violations = errors
            .map(|error| SchemaViolation {
                path: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect();
        return Err(ToolArgumentError::Invalid {
            tool: tool.name.clone(),
            call_id: call_id.to_string(),
            violations,
        });
    }

    Ok(arguments)
}
