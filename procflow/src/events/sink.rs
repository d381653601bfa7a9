//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, Level};

use super::{EventKind, PipelineEvent};

/// Receives lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Observes an event.
    async fn emit(&self, event: &PipelineEvent);

    /// Answers a vetoable event: `Some(false)` vetoes, `None` abstains.
    async fn decide(&self, _event: &PipelineEvent) -> Option<bool> {
        None
    }
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PipelineEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level` (debug or info).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates an info-level sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        let index = event.job.as_ref().map(|j| j.index);
        let status = event.job.as_ref().map(|j| j.status);
        if self.level == Level::INFO {
            info!(event = %event.kind, pipeline = %event.pipeline, proc = ?event.proc, index = ?index, status = ?status, outcome = ?event.outcome, "Event: {}", event.kind);
        } else {
            debug!(event = %event.kind, pipeline = %event.pipeline, proc = ?event.proc, index = ?index, status = ?status, outcome = ?event.outcome, "Event: {}", event.kind);
        }
    }
}

/// Records events in memory; used by tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns the hook names in arrival order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.kind.as_str()).collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}
