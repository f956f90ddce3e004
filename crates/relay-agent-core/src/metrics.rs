use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::bus::{EventBus, EventSink, SinkError, Subscription};
use crate::events::AgentEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetrics {
    #[serde(rename = "callCount")]
    pub call_count: u64,
    #[serde(rename = "errorCount")]
    pub error_count: u64,
    #[serde(rename = "totalDurationMs")]
    pub total_duration_ms: u64,
}

type MetricsTable = Arc<Mutex<BTreeMap<String, ToolMetrics>>>;

struct MetricsSink {
    table: MetricsTable,
}

impl EventSink for MetricsSink {
    fn on_event(&self, event: &AgentEvent) -> Result<(), SinkError> {
        if let AgentEvent::ToolEnd {
            tool_name,
            is_error,
            duration_ms,
            ..
        } = event
        {
            let mut table = lock(&self.table);
            let metrics = table.entry(tool_name.clone()).or_default();
            metrics.call_count += 1;
            if *is_error {
                metrics.error_count += 1;
            }
            metrics.total_duration_ms += duration_ms;
        }
        Ok(())
    }
}

/// Per-tool call and error counts, fed by `tool_end` events.
///
/// Aggregates never reset; detaching only stops further updates.
pub struct MetricsCollector {
    table: MetricsTable,
    subscription: Mutex<Option<Subscription>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            table: Arc::default(),
            subscription: Mutex::new(None),
        }
    }

    /// Attaching to the bus it already observes is a no-op.
    pub fn attach(&self, bus: &EventBus) {
        let mut subscription = lock(&self.subscription);
        Subscription::replace(&mut subscription, bus, || {
            let sink: Arc<dyn EventSink> = Arc::new(MetricsSink {
                table: Arc::clone(&self.table),
            });
            sink
        });
    }

    pub fn detach(&self) {
        Subscription::cancel(&mut lock(&self.subscription));
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    pub fn tool_metrics(&self, tool_name: &str) -> Option<ToolMetrics> {
        lock(&self.table).get(tool_name).copied()
    }

    /// Every tool seen so far, by name.
    pub fn all_tool_metrics(&self) -> Vec<(String, ToolMetrics)> {
        lock(&self.table)
            .iter()
            .map(|(name, metrics)| (name.clone(), *metrics))
            .collect()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
