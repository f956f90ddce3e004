use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay_ai::TokenUsage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::{EventBus, EventSink, SinkError, Subscription};
use crate::events::AgentEvent;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_creation: f64,
}

impl ModelPricing {
    pub fn cost_of(&self, usage: &TokenUsage) -> f64 {
        let per_token = |tokens: u64, price: f64| tokens as f64 * price / 1_000_000.0;
        per_token(usage.input_other, self.input)
            + per_token(usage.output, self.output)
            + per_token(usage.input_cache_read, self.cache_read)
            + per_token(usage.input_cache_creation, self.cache_creation)
    }
}

/// Token totals of one session. `totalInputTokens` counts every prompt token,
/// cached or not; the cache fields break that total down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSessionSummary {
    #[serde(rename = "totalInputTokens")]
    pub total_input_tokens: u64,
    #[serde(rename = "totalOutputTokens")]
    pub total_output_tokens: u64,
    #[serde(rename = "totalCacheReadTokens")]
    pub total_cache_read_tokens: u64,
    #[serde(rename = "totalCacheCreationTokens")]
    pub total_cache_creation_tokens: u64,
    #[serde(rename = "callCount")]
    pub call_count: u64,
    #[serde(rename = "estimatedCostUsd")]
    pub estimated_cost_usd: f64,
}

#[derive(Default)]
struct CostLedger {
    sessions: HashMap<String, CostSessionSummary>,
    active: Option<String>,
}

struct CostSink {
    ledger: Arc<Mutex<CostLedger>>,
    pricing: Option<ModelPricing>,
}

impl EventSink for CostSink {
    fn on_event(&self, event: &AgentEvent) -> Result<(), SinkError> {
        match event {
            AgentEvent::AgentStart { session_id, .. } => {
                let mut ledger = lock(&self.ledger);
                ledger
                    .sessions
                    .insert(session_id.clone(), CostSessionSummary::default());
                ledger.active = Some(session_id.clone());
            }
            AgentEvent::Usage { usage, .. } => {
                let mut ledger = lock(&self.ledger);
                let CostLedger { sessions, active } = &mut *ledger;
                let Some(summary) = active.as_ref().and_then(|id| sessions.get_mut(id)) else {
                    debug!("usage event before any agent_start; ignoring");
                    return Ok(());
                };
                summary.total_input_tokens += usage.total_input();
                summary.total_output_tokens += usage.output;
                summary.total_cache_read_tokens += usage.input_cache_read;
                summary.total_cache_creation_tokens += usage.input_cache_creation;
                summary.call_count += 1;
                if let Some(pricing) = self.pricing.as_ref() {
                    summary.estimated_cost_usd += pricing.cost_of(usage);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Per-session token accounting. Usage goes to the session most recently
/// opened by `agent_start`.
pub struct CostTracker {
    ledger: Arc<Mutex<CostLedger>>,
    pricing: Option<ModelPricing>,
    subscription: Mutex<Option<Subscription>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::with_pricing(None)
    }

    pub fn with_pricing(pricing: Option<ModelPricing>) -> Self {
        Self {
            ledger: Arc::default(),
            pricing,
            subscription: Mutex::new(None),
        }
    }

    /// Attaching to the bus it already observes is a no-op.
    pub fn attach(&self, bus: &EventBus) {
        let mut subscription = lock(&self.subscription);
        Subscription::replace(&mut subscription, bus, || {
            let sink: Arc<dyn EventSink> = Arc::new(CostSink {
                ledger: Arc::clone(&self.ledger),
                pricing: self.pricing,
            });
            sink
        });
    }

    pub fn detach(&self) {
        Subscription::cancel(&mut lock(&self.subscription));
    }

    pub fn session(&self, session_id: &str) -> Option<CostSessionSummary> {
        lock(&self.ledger).sessions.get(session_id).copied()
    }

    pub fn active_session(&self) -> Option<String> {
        lock(&self.ledger).active.clone()
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
