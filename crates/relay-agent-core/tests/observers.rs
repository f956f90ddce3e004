use std::sync::{Arc, Mutex};

use relay_agent_core::{
    AgentEvent, CostTracker, EventBus, EventSink, FailureWindow, MetricsCollector, ModelPricing,
    SinkError, ToolMetrics,
};
use relay_ai::TokenUsage;

fn tool_end(name: &str, is_error: bool, duration_ms: u64) -> AgentEvent {
    AgentEvent::ToolEnd {
        tool_id: format!("{name}-call"),
        tool_name: name.to_string(),
        output: String::new(),
        is_error,
        duration_ms,
    }
}

fn agent_start(session_id: &str) -> AgentEvent {
    AgentEvent::AgentStart {
        session_id: session_id.to_string(),
        model: None,
    }
}

fn usage(input_other: u64, output: u64, cache_read: u64, cache_creation: u64) -> AgentEvent {
    AgentEvent::Usage {
        usage: TokenUsage {
            input_other,
            output,
            input_cache_read: cache_read,
            input_cache_creation: cache_creation,
        },
        model: None,
    }
}

fn kind_log() -> (Arc<Mutex<Vec<String>>>, Arc<dyn EventSink>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink_log = Arc::clone(&log);
    let sink: Arc<dyn EventSink> = Arc::new(move |event: &AgentEvent| -> Result<(), SinkError> {
        sink_log
            .lock()
            .expect("log lock")
            .push(event.kind().to_string());
        Ok(())
    });
    (log, sink)
}

#[test]
fn metrics_are_kept_per_tool() {
    let bus = EventBus::new();
    let metrics = MetricsCollector::new();
    metrics.attach(&bus);

    bus.emit(&tool_end("read", false, 10));
    bus.emit(&tool_end("write", true, 5));
    bus.emit(&tool_end("read", false, 7));

    assert_eq!(
        metrics.tool_metrics("read"),
        Some(ToolMetrics {
            call_count: 2,
            error_count: 0,
            total_duration_ms: 17,
        })
    );
    assert_eq!(
        metrics.tool_metrics("write"),
        Some(ToolMetrics {
            call_count: 1,
            error_count: 1,
            total_duration_ms: 5,
        })
    );
    assert_eq!(metrics.tool_metrics("glob"), None);

    let names: Vec<String> = metrics
        .all_tool_metrics()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["read", "write"]);
}

#[test]
fn detached_metrics_keep_history_but_stop_counting() {
    let bus = EventBus::new();
    let metrics = MetricsCollector::new();
    metrics.attach(&bus);
    bus.emit(&tool_end("read", false, 3));

    metrics.detach();
    assert!(!metrics.is_attached());
    assert_eq!(bus.sink_count(), 0);
    bus.emit(&tool_end("read", true, 3));

    let read = metrics.tool_metrics("read").expect("read metrics");
    assert_eq!(read.call_count, 1);
    assert_eq!(read.error_count, 0);
}

#[test]
fn attaching_twice_to_one_bus_does_not_double_count() {
    let bus = EventBus::new();
    let metrics = MetricsCollector::new();
    metrics.attach(&bus);
    metrics.attach(&bus.clone());
    assert_eq!(bus.sink_count(), 1);

    bus.emit(&tool_end("grep", false, 1));
    assert_eq!(metrics.tool_metrics("grep").map(|m| m.call_count), Some(1));
}

#[test]
fn moving_an_observer_to_another_bus_leaves_the_first() {
    let first = EventBus::new();
    let second = EventBus::new();
    let metrics = MetricsCollector::new();
    metrics.attach(&first);
    metrics.attach(&second);

    assert_eq!(first.sink_count(), 0);
    assert_eq!(second.sink_count(), 1);
    first.emit(&tool_end("read", false, 1));
    second.emit(&tool_end("read", false, 1));
    assert_eq!(metrics.tool_metrics("read").map(|m| m.call_count), Some(1));
}

#[test]
fn cost_tracker_totals_usage_for_the_active_session() {
    let bus = EventBus::new();
    let costs = CostTracker::with_pricing(Some(ModelPricing {
        input: 3.0,
        output: 15.0,
        cache_read: 0.3,
        cache_creation: 3.75,
    }));
    costs.attach(&bus);

    bus.emit(&usage(50, 5, 0, 0));
    assert_eq!(costs.active_session(), None);

    bus.emit(&agent_start("s1"));
    bus.emit(&usage(100, 20, 1_000, 10));
    bus.emit(&usage(40, 10, 0, 0));
    bus.emit(&agent_start("s2"));
    bus.emit(&usage(1, 1, 0, 0));

    let s1 = costs.session("s1").expect("s1 summary");
    assert_eq!(s1.total_input_tokens, 1_150);
    assert_eq!(s1.total_output_tokens, 30);
    assert_eq!(s1.total_cache_read_tokens, 1_000);
    assert_eq!(s1.total_cache_creation_tokens, 10);
    assert_eq!(s1.call_count, 2);
    let expected = (140.0 * 3.0 + 30.0 * 15.0 + 1_000.0 * 0.3 + 10.0 * 3.75) / 1_000_000.0;
    assert!((s1.estimated_cost_usd - expected).abs() < 1e-12);

    assert_eq!(costs.active_session().as_deref(), Some("s2"));
    assert_eq!(costs.session("s2").map(|s| s.call_count), Some(1));
    assert_eq!(costs.session("missing"), None);
}

#[test]
fn restarting_a_session_zeroes_its_totals() {
    let bus = EventBus::new();
    let costs = CostTracker::new();
    costs.attach(&bus);

    bus.emit(&agent_start("s1"));
    bus.emit(&usage(10, 10, 0, 0));
    bus.emit(&agent_start("s1"));

    let s1 = costs.session("s1").expect("s1 summary");
    assert_eq!(s1.call_count, 0);
    assert_eq!(s1.total_input_tokens, 0);
    assert_eq!(s1.estimated_cost_usd, 0.0);
}

#[test]
fn failure_window_counts_density_not_streaks() {
    let mut window = FailureWindow::new(5, 3);
    for failed in [true, false, true, false] {
        window.record(failed);
        assert!(!window.should_stop());
    }
    window.record(true);
    assert!(window.should_stop());
    assert_eq!(window.failures(), 3);

    // Oldest failure falls out of the window.
    window.record(false);
    assert!(!window.should_stop());
    assert_eq!(window.len(), 5);
}

#[test]
fn a_failing_sink_does_not_block_later_sinks() {
    let bus = EventBus::new();
    let failing: Arc<dyn EventSink> =
        Arc::new(|_: &AgentEvent| -> Result<(), SinkError> { Err(SinkError::new("boom")) });
    let (log, recorder) = kind_log();
    bus.attach(failing);
    bus.attach(recorder);

    bus.emit(&AgentEvent::TurnStart { turn: 1 });
    bus.emit(&AgentEvent::MessageStart { turn: 1 });

    assert_eq!(
        *log.lock().expect("log lock"),
        vec!["turn_start", "message_start"]
    );
}

#[test]
fn late_sinks_see_only_later_events() {
    let bus = EventBus::new();
    bus.emit(&AgentEvent::TurnStart { turn: 1 });

    let (log, recorder) = kind_log();
    bus.attach(recorder);
    bus.emit(&AgentEvent::TurnEnd {
        turn: 1,
        stop_reason: None,
    });

    assert_eq!(*log.lock().expect("log lock"), vec!["turn_end"]);
}
