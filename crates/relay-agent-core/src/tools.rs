use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use relay_ai::{validate_tool_call, AbortSignal, Message, Tool, ToolCall};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::AgentEvent;
use crate::failure::FailureWindow;
use crate::turn::AgentEventStream;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, call_id: String, arguments: Value) -> Result<String, ToolError>;
}

#[async_trait]
impl<F> ToolHandler for F
where
    F: Fn(String, Value) -> ToolFuture + Send + Sync + 'static,
{
    async fn call(&self, call_id: String, arguments: Value) -> Result<String, ToolError> {
        (self)(call_id, arguments).await
    }
}

/// A tool definition paired with the code that runs it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: Tool,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn new(definition: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            definition,
            handler,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRoundOutcome {
    /// One `tool` message per requested call, in request order.
    pub results: Vec<Message>,
    pub executed: usize,
    pub stopped_on_failures: bool,
    pub aborted: bool,
}

const SKIPPED_FOR_FAILURES: &str = "Skipped: too many recent tool failures.";
const SKIPPED_FOR_ABORT: &str = "Skipped due to abort signal.";

/// Runs `calls` one after another, bracketing each with `tool_start` and
/// `tool_end`.
///
/// Arguments are checked against the tool's schema before the handler runs;
/// a rejected call counts as a failure. Every executed call is recorded in
/// `failures`, and once the window says stop the remaining calls are answered
/// with a skip notice instead of running.
pub async fn execute_tool_calls<R>(
    tools: &[RegisteredTool],
    calls: &[ToolCall],
    events: &AgentEventStream<R>,
    signal: Option<&AbortSignal>,
    failures: &mut FailureWindow,
) -> ToolRoundOutcome
where
    R: Clone + Send + Sync + 'static,
{
    let definitions: Vec<Tool> = tools.iter().map(|tool| tool.definition.clone()).collect();
    let mut outcome = ToolRoundOutcome::default();

    for (index, call) in calls.iter().enumerate() {
        if signal.is_some_and(AbortSignal::is_aborted) {
            outcome.aborted = true;
            skip_remaining(&calls[index..], events, SKIPPED_FOR_ABORT, &mut outcome);
            break;
        }

        events.emit(AgentEvent::ToolStart {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            input: display_input(call),
        });

        let started = Instant::now();
        let (output, is_error) = run_single_call(tools, &definitions, call, signal).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        outcome.executed += 1;
        debug!(
            tool_call_id = call.id.as_str(),
            tool_name = call.name.as_str(),
            duration_ms,
            is_error,
            "tool execution finished"
        );

        events.emit(AgentEvent::ToolEnd {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: output.clone(),
            is_error,
            duration_ms,
        });
        outcome.results.push(Message::tool_result(call.id.clone(), output));

        failures.record(is_error);
        if failures.should_stop() {
            warn!(
                failures = failures.failures(),
                window = failures.window_size(),
                "tool failure threshold reached; skipping remaining calls"
            );
            outcome.stopped_on_failures = true;
            skip_remaining(&calls[index + 1..], events, SKIPPED_FOR_FAILURES, &mut outcome);
            break;
        }
    }

    outcome
}

async fn run_single_call(
    tools: &[RegisteredTool],
    definitions: &[Tool],
    call: &ToolCall,
    signal: Option<&AbortSignal>,
) -> (String, bool) {
    let arguments = match validate_tool_call(definitions, call) {
        Ok(arguments) => arguments,
        Err(error) => return (error.to_string(), true),
    };
    let Some(tool) = tools.iter().find(|tool| tool.definition.name == call.name) else {
        return (format!("tool '{}' not found", call.name), true);
    };

    let execution = tool.handler.call(call.id.clone(), arguments);
    let result = match signal {
        Some(signal) => tokio::select! {
            _ = signal.cancelled() => Err(ToolError::new("tool execution aborted")),
            result = execution => result,
        },
        None => execution.await,
    };

    match result {
        Ok(output) => (output, false),
        Err(error) => (error.to_string(), true),
    }
}

fn skip_remaining<R>(
    calls: &[ToolCall],
    events: &AgentEventStream<R>,
    reason: &str,
    outcome: &mut ToolRoundOutcome,
) where
    R: Clone + Send + Sync + 'static,
{
    for call in calls {
        events.emit(AgentEvent::ToolStart {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            input: display_input(call),
        });
        events.emit(AgentEvent::ToolEnd {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: reason.to_string(),
            is_error: true,
            duration_ms: 0,
        });
        outcome
            .results
            .push(Message::tool_result(call.id.clone(), reason));
    }
}

fn display_input(call: &ToolCall) -> Value {
    call.parse_arguments()
        .unwrap_or_else(|_| Value::String(call.arguments.clone()))
}
