//! Agent-side plumbing on top of `relay-ai`: the event vocabulary, the
//! synchronous event bus with its observers, and the turn and tool drivers.

mod bus;
mod cost;
mod events;
mod failure;
mod metrics;
mod tools;
mod turn;

pub use bus::{EventBus, EventSink, SinkError, SinkId};
pub use cost::{CostSessionSummary, CostTracker, ModelPricing};
pub use events::AgentEvent;
pub use failure::FailureWindow;
pub use metrics::{MetricsCollector, ToolMetrics};
pub use tools::{
    execute_tool_calls, RegisteredTool, ToolError, ToolFuture, ToolHandler, ToolRoundOutcome,
};
pub use turn::{
    agent_event_stream, spawn_provider_turn, spawn_recorded_turn, stream_assistant_message,
    AgentEventStream, AssistantTurn, TurnSession,
};
