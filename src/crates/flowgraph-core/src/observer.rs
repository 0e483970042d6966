//! Observer events and logging hooks
//!
//! The engine reports progress to an [`ExecutionObserver`] sink: one event
//! per workflow start/success/failure and one per node start, success,
//! failure, or cancellation. Events are plain serializable records; the
//! sink decides what to do with them (forward over a socket, collect in a
//! test, drop them).
//!
//! Structured log records go through `tracing` with the same field set
//! (`workflow_id`, `execution_id`, `node_id`, `node_type`, `duration_ms`,
//! `error`); installing a subscriber is the embedder's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// The event vocabulary of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "workflow.started")]
    WorkflowStarted,
    #[serde(rename = "workflow.succeeded")]
    WorkflowSucceeded,
    #[serde(rename = "workflow.failed")]
    WorkflowFailed,
    #[serde(rename = "node.started")]
    NodeStarted,
    #[serde(rename = "node.succeeded")]
    NodeSucceeded,
    #[serde(rename = "node.failed")]
    NodeFailed,
    #[serde(rename = "node.cancelled")]
    NodeCancelled,
}

/// One observer event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event: EventType,
    pub workflow_id: String,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(event: EventType, workflow_id: &str, execution_id: &str) -> Self {
        Self {
            event,
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
            node_id: None,
            node_type: None,
            duration_ms: None,
            error: None,
            time: Utc::now(),
        }
    }

    pub fn with_node(mut self, node_id: &str, node_type: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self.node_type = Some(node_type.to_string());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Sink for execution events.
///
/// Implementations must be cheap and must not fail; the engine awaits
/// each dispatch inline.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_event(&self, event: ExecutionEvent);
}

/// Discards every event.
pub struct NoopObserver;

#[async_trait]
impl ExecutionObserver for NoopObserver {
    async fn on_event(&self, _event: ExecutionEvent) {}
}

/// Collects events in memory; the observer used throughout the tests.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Event types in arrival order, for compact assertions.
    pub fn sequence(&self) -> Vec<EventType> {
        self.events.lock().iter().map(|e| e.event).collect()
    }
}

#[async_trait]
impl ExecutionObserver for CollectingObserver {
    async fn on_event(&self, event: ExecutionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_dotted_names() {
        let event = ExecutionEvent::new(EventType::NodeSucceeded, "wf", "ex")
            .with_node("n1", "number")
            .with_duration(12);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node.succeeded");
        assert_eq!(json["node_id"], "n1");
        assert_eq!(json["duration_ms"], 12);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_collecting_observer_orders_events() {
        let observer = CollectingObserver::new();
        observer
            .on_event(ExecutionEvent::new(EventType::WorkflowStarted, "wf", "ex"))
            .await;
        observer
            .on_event(ExecutionEvent::new(EventType::WorkflowSucceeded, "wf", "ex"))
            .await;
        assert_eq!(
            observer.sequence(),
            vec![EventType::WorkflowStarted, EventType::WorkflowSucceeded]
        );
    }
}
