use std::future::Future;

use relay_ai::{
    AbortSignal, EventStream, Message, PartMerger, PartStream, ProviderError, ProviderRef,
    ProviderRequest, ResponseSummary, StreamError, StreamedPart,
};
use tracing::{debug, info, warn};

use crate::events::AgentEvent;

pub type AgentEventStream<R> = EventStream<AgentEvent, R>;

/// An event stream whose failures surface as `AgentEvent::Error`.
pub fn agent_event_stream<R>(signal: Option<AbortSignal>) -> AgentEventStream<R>
where
    R: Clone + Send + Sync + 'static,
{
    EventStream::new(signal, AgentEvent::from_stream_error)
}

/// The assembled assistant message and what the backend reported about it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub message: Message,
    pub summary: ResponseSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSession {
    pub session_id: String,
    pub model: Option<String>,
}

impl TurnSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Drains `parts` through a merger, publishing progress as it goes.
///
/// Emits `message_start`, a `message_delta` per text fragment, a `thinking`
/// per reasoning fragment, then `usage`, `context_management` (only when the
/// backend reported edits) and `message_end`. Usage is still published when
/// the parts fail midway.
pub async fn stream_assistant_message<R>(
    parts: &mut PartStream,
    events: &AgentEventStream<R>,
    turn: u32,
    model: Option<&str>,
) -> Result<AssistantTurn, StreamError>
where
    R: Clone + Send + Sync + 'static,
{
    events.emit(AgentEvent::MessageStart { turn });

    let mut merger = PartMerger::new();
    while let Some(part) = parts.next().await {
        let part = match part {
            Ok(part) => part,
            Err(error) => {
                emit_usage(events, parts, model);
                return Err(error.into());
            }
        };

        match &part {
            StreamedPart::Text { text } if !text.is_empty() => {
                events.emit(AgentEvent::MessageDelta { text: text.clone() })
            }
            StreamedPart::Thinking { text, .. } if !text.is_empty() => {
                events.emit(AgentEvent::Thinking { text: text.clone() })
            }
            _ => {}
        }
        merger.push(part);

        if events.is_settled() {
            debug!(turn, "event stream settled mid-message; stopping");
            return Err(StreamError::Cancelled);
        }
    }

    if merger.dropped_deltas() > 0 {
        debug!(dropped = merger.dropped_deltas(), "orphan tool_call_delta parts dropped");
    }

    emit_usage(events, parts, model);
    let summary = parts.summary().clone();
    if !summary.context_edits.is_empty() {
        events.emit(AgentEvent::ContextManagement {
            edits: summary.context_edits.clone(),
        });
    }

    let message = merger.finish_message();
    events.emit(AgentEvent::MessageEnd {
        message: message.clone(),
        response_id: summary.id.clone(),
        stop_reason: summary.stop_reason,
    });

    Ok(AssistantTurn { message, summary })
}

fn emit_usage<R>(events: &AgentEventStream<R>, parts: &PartStream, model: Option<&str>)
where
    R: Clone + Send + Sync + 'static,
{
    let usage = parts.usage();
    if usage.total() == 0 {
        return;
    }
    events.emit(AgentEvent::Usage {
        usage,
        model: model.map(str::to_string),
    });
}

/// Runs a single turn against a live backend on a background task.
pub fn spawn_provider_turn(
    session: TurnSession,
    provider: ProviderRef,
    request: ProviderRequest,
    signal: Option<AbortSignal>,
) -> AgentEventStream<AssistantTurn> {
    let events = agent_event_stream(signal.clone());
    let task_events = events.clone();
    tokio::spawn(async move {
        let open = provider.stream(&request, signal.clone());
        run_turn(session, task_events, signal, open).await;
    });
    events
}

/// Runs a single turn over already-recorded parts.
pub fn spawn_recorded_turn(
    session: TurnSession,
    parts: PartStream,
    signal: Option<AbortSignal>,
) -> AgentEventStream<AssistantTurn> {
    let events = agent_event_stream(signal.clone());
    let task_events = events.clone();
    tokio::spawn(async move {
        run_turn(session, task_events, signal, async move { Ok(parts) }).await;
    });
    events
}

async fn run_turn<F>(
    session: TurnSession,
    events: AgentEventStream<AssistantTurn>,
    signal: Option<AbortSignal>,
    open: F,
) where
    F: Future<Output = Result<PartStream, ProviderError>>,
{
    const TURN: u32 = 1;

    events.emit(AgentEvent::AgentStart {
        session_id: session.session_id.clone(),
        model: session.model.clone(),
    });
    events.emit(AgentEvent::TurnStart { turn: TURN });

    let outcome = match open.await {
        Ok(mut parts) => {
            stream_assistant_message(&mut parts, &events, TURN, session.model.as_deref()).await
        }
        Err(error) => Err(error.into()),
    };

    match outcome {
        Ok(turn) => {
            info!(
                session_id = session.session_id.as_str(),
                stop_reason = ?turn.summary.stop_reason,
                output_tokens = turn.summary.usage.output,
                "assistant turn completed"
            );
            events.emit(AgentEvent::TurnEnd {
                turn: TURN,
                stop_reason: turn.summary.stop_reason,
            });
            events.emit(AgentEvent::AgentEnd {
                session_id: session.session_id,
            });
            events.complete(turn);
        }
        Err(error) => {
            let error = if signal.as_ref().is_some_and(AbortSignal::is_aborted) {
                StreamError::Cancelled
            } else {
                error
            };
            warn!(
                session_id = session.session_id.as_str(),
                error = %error,
                "assistant turn failed"
            );
            events.fail(error);
        }
    }
}
