use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use relay_agent_core::{
    spawn_provider_turn, spawn_recorded_turn, AgentEvent, AssistantTurn, CostTracker, EventBus,
    EventSink, MetricsCollector, SinkError, TurnSession,
};
use relay_ai::{
    create_provider, validate_blocks, AbortController, DomainBlock, PartStream, ProviderKind,
    ProviderRequest, WireMessage,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::RelayConfig;

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Backend whose wire format the recording uses.
    #[arg(long)]
    pub provider: ProviderKind,
    /// Recorded response body: an SSE transcript or a complete JSON response.
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long, default_value = "replay")]
    pub session_id: String,
    /// Also print every agent event as a JSON line before the summary.
    #[arg(long, default_value_t = false)]
    pub events: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    #[arg(long)]
    pub prompt: String,
    #[arg(long)]
    pub system: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// JSON array of domain content blocks.
    #[arg(long)]
    pub input: PathBuf,
}

fn read_input(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|error| format!("failed to read {}: {error}", path.display()))
}

fn to_pretty_json(value: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|error| format!("failed to render output: {error}"))
}

fn print_events_sink() -> Arc<dyn EventSink> {
    Arc::new(|event: &AgentEvent| -> Result<(), SinkError> {
        let line = serde_json::to_string(event).map_err(|error| SinkError::new(error.to_string()))?;
        println!("{line}");
        Ok(())
    })
}

pub async fn run_replay(args: ReplayArgs, config: &RelayConfig) -> Result<(), String> {
    let body = read_input(&args.input)?;
    let parts = PartStream::from_response_body(args.provider, &body).map_err(|error| error.to_string())?;

    let bus = EventBus::new();
    let metrics = MetricsCollector::new();
    metrics.attach(&bus);
    let costs = CostTracker::with_pricing(config.pricing);
    costs.attach(&bus);
    if args.events {
        bus.attach(print_events_sink());
    }

    let mut session = TurnSession::new(args.session_id.clone());
    if let Some(settings) = config.provider.as_ref().filter(|settings| settings.kind == args.provider) {
        session = session.with_model(settings.model.clone());
    }

    info!(
        provider = %args.provider,
        input = %args.input.display(),
        "replaying recorded response"
    );
    let stream = spawn_recorded_turn(session, parts, None);
    let turn = bus.pump(&stream).await.map_err(|error| error.to_string())?;

    let tool_metrics: serde_json::Map<String, Value> = metrics
        .all_tool_metrics()
        .into_iter()
        .map(|(name, metrics)| (name, json!(metrics)))
        .collect();
    let report = json!({
        "message": turn.message,
        "responseId": turn.summary.id,
        "stopReason": turn.summary.stop_reason,
        "usage": turn.summary.usage,
        "contextEdits": turn.summary.context_edits,
        "session": costs.session(&args.session_id),
        "toolMetrics": tool_metrics,
    });
    println!("{}", to_pretty_json(&report)?);
    Ok(())
}

pub async fn run_ask(args: AskArgs, config: &RelayConfig) -> Result<(), String> {
    let settings = config
        .provider
        .clone()
        .ok_or_else(|| "no [provider] section configured; pass --config".to_string())?;
    let session = TurnSession::new("ask").with_model(settings.model.clone());
    let provider = create_provider(settings);

    let controller = AbortController::new();
    let signal = controller.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; aborting request");
            controller.abort();
        }
    });

    let bus = EventBus::new();
    let costs = CostTracker::with_pricing(config.pricing);
    costs.attach(&bus);
    bus.attach(Arc::new(|event: &AgentEvent| -> Result<(), SinkError> {
        let mut stdout = std::io::stdout().lock();
        let written = match event {
            AgentEvent::MessageDelta { text } => write!(stdout, "{text}"),
            AgentEvent::MessageEnd { .. } => writeln!(stdout),
            _ => return Ok(()),
        };
        written
            .and_then(|()| stdout.flush())
            .map_err(|error| SinkError::new(error.to_string()))
    }));

    let request = ProviderRequest {
        system: args.system,
        messages: vec![WireMessage::user_text(args.prompt)],
        ..ProviderRequest::default()
    };
    let stream = spawn_provider_turn(session, provider, request, Some(signal));
    let turn: AssistantTurn = bus.pump(&stream).await.map_err(|error| error.to_string())?;

    if let Some(summary) = costs.session("ask") {
        eprintln!(
            "tokens: {} in / {} out, stop: {:?}",
            summary.total_input_tokens, summary.total_output_tokens, turn.summary.stop_reason
        );
    }
    Ok(())
}

pub fn run_validate(args: ValidateArgs) -> Result<(), String> {
    let text = read_input(&args.input)?;
    let blocks: Vec<DomainBlock> =
        serde_json::from_str(&text).map_err(|error| format!("invalid block list: {error}"))?;
    let report = validate_blocks(&blocks);
    println!("{}", to_pretty_json(&json!(report))?);

    match report.errors.as_ref() {
        Some(errors) if !report.valid => Err(format!("{} violation(s) found", errors.len())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn validate_rejects_non_object_tool_input() {
        let file = write_temp(
            r#"[
                {"type":"text","text":"hi"},
                {"type":"tool_use","toolId":"t1","toolName":"read","input":"not an object"}
            ]"#,
        );
        let error = run_validate(ValidateArgs {
            input: file.path().to_path_buf(),
        })
        .expect_err("should report violation");
        assert_eq!(error, "1 violation(s) found");
    }

    #[test]
    fn validate_accepts_well_formed_blocks() {
        let file = write_temp(
            r#"[{"type":"tool_use","toolId":"t1","toolName":"read","input":{"path":"/tmp"}}]"#,
        );
        run_validate(ValidateArgs {
            input: file.path().to_path_buf(),
        })
        .expect("valid blocks");
    }

    #[tokio::test]
    async fn replay_reports_a_missing_input_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let error = run_replay(
            ReplayArgs {
                provider: ProviderKind::Anthropic,
                input: dir.path().join("absent.sse"),
                session_id: "replay".to_string(),
                events: false,
            },
            &RelayConfig::default(),
        )
        .await
        .expect_err("missing input");
        assert!(error.starts_with("failed to read"));
    }

    #[tokio::test]
    async fn replay_accepts_complete_openai_json() {
        let file = write_temp(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"message":{"role":"assistant","content":"done"},"finish_reason":"stop"}],"usage":{"prompt_tokens":4,"completion_tokens":1}}"#,
        );
        run_replay(
            ReplayArgs {
                provider: ProviderKind::Openai,
                input: file.path().to_path_buf(),
                session_id: "s".to_string(),
                events: true,
            },
            &RelayConfig::default(),
        )
        .await
        .expect("replay complete response");
    }

    #[tokio::test]
    async fn ask_requires_a_provider_section() {
        let error = run_ask(
            AskArgs {
                prompt: "hi".to_string(),
                system: None,
            },
            &RelayConfig::default(),
        )
        .await
        .expect_err("no provider");
        assert!(error.contains("[provider]"));
    }
}
