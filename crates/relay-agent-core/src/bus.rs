use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay_ai::{EventStream, StreamError};
use thiserror::Error;
use tracing::warn;

use crate::events::AgentEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SinkError {
    message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receives every event emitted on the bus it is attached to.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &AgentEvent) -> Result<(), SinkError>;
}

impl<F> EventSink for F
where
    F: Fn(&AgentEvent) -> Result<(), SinkError> + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent) -> Result<(), SinkError> {
        (self)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

struct BusInner {
    next_id: AtomicU64,
    sinks: Mutex<Vec<(SinkId, Arc<dyn EventSink>)>>,
}

/// Synchronous fan-out of agent events.
///
/// `emit` calls every attached sink in attachment order before returning, so
/// all sinks see event N before any sees event N+1. Nothing is buffered: a
/// sink attached later never sees earlier events. Clones share one sink list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn attach(&self, sink: Arc<dyn EventSink>) -> SinkId {
        let id = SinkId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_sinks().push((id, sink));
        id
    }

    /// Returns whether `id` was attached.
    pub fn detach(&self, id: SinkId) -> bool {
        let mut sinks = self.lock_sinks();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    pub fn sink_count(&self) -> usize {
        self.lock_sinks().len()
    }

    /// True when both handles share the same sink list.
    pub fn same_bus(&self, other: &EventBus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn emit(&self, event: &AgentEvent) {
        // Snapshot so a sink may attach or detach while being called.
        let sinks = self.lock_sinks().clone();
        for (id, sink) in sinks {
            if let Err(error) = sink.on_event(event) {
                warn!(
                    sink = id.0,
                    event = event.kind(),
                    error = %error,
                    "event sink failed"
                );
            }
        }
    }

    /// Republishes every event of `stream` and returns its terminal result.
    pub async fn pump<R>(&self, stream: &EventStream<AgentEvent, R>) -> Result<R, StreamError>
    where
        R: Clone + Send + Sync + 'static,
    {
        while let Some(event) = stream.next().await {
            self.emit(&event);
        }
        stream.result().await
    }

    fn lock_sinks(&self) -> MutexGuard<'_, Vec<(SinkId, Arc<dyn EventSink>)>> {
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// An observer's attachment to one bus.
pub(crate) struct Subscription {
    bus: EventBus,
    id: SinkId,
}

impl Subscription {
    /// Attaches `sink` unless `current` is already on `bus`. Moving to a
    /// different bus detaches from the old one first.
    pub(crate) fn replace(
        current: &mut Option<Subscription>,
        bus: &EventBus,
        sink: impl FnOnce() -> Arc<dyn EventSink>,
    ) {
        if let Some(existing) = current.as_ref() {
            if existing.bus.same_bus(bus) {
                return;
            }
        }
        Self::cancel(current);
        *current = Some(Subscription {
            bus: bus.clone(),
            id: bus.attach(sink()),
        });
    }

    pub(crate) fn cancel(current: &mut Option<Subscription>) {
        if let Some(existing) = current.take() {
            existing.bus.detach(existing.id);
        }
    }
}
