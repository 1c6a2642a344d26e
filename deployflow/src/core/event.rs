//! Pipeline lifecycle events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An event emitted by the sequencer during a run.
///
/// Events are consumed by [`EventSink`](crate::events::EventSink)s for
/// logging, monitoring, or notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "stage.started", "action.failed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Converts the payload (type, timestamp and data) to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.event_type,
            "timestamp": self.timestamp,
            "data": self.data,
        })
    }

    /// Creates a "pipeline.started" event.
    #[must_use]
    pub fn pipeline_started(run_id: Uuid, pipeline: &str, commit: &str) -> Self {
        Self::new("pipeline.started")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("commit", serde_json::json!(commit))
    }

    /// Creates a "pipeline.completed" event.
    #[must_use]
    pub fn pipeline_completed(run_id: Uuid, status: &str, duration_ms: f64) -> Self {
        Self::new("pipeline.completed")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("status", serde_json::json!(status))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "pipeline.cancelled" event.
    #[must_use]
    pub fn pipeline_cancelled(run_id: Uuid, reason: &str) -> Self {
        Self::new("pipeline.cancelled")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("reason", serde_json::json!(reason))
    }

    /// Creates a "stage.started" event.
    #[must_use]
    pub fn stage_started(run_id: Uuid, stage: &str) -> Self {
        Self::new("stage.started")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("stage", serde_json::json!(stage))
    }

    /// Creates a "stage.completed" event.
    #[must_use]
    pub fn stage_completed(run_id: Uuid, stage: &str, status: &str) -> Self {
        Self::new("stage.completed")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("stage", serde_json::json!(stage))
            .add_data("status", serde_json::json!(status))
    }

    /// Creates an "action.started" event.
    #[must_use]
    pub fn action_started(run_id: Uuid, stage: &str, action: &str, run_order: u32) -> Self {
        Self::new("action.started")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("stage", serde_json::json!(stage))
            .add_data("action", serde_json::json!(action))
            .add_data("run_order", serde_json::json!(run_order))
    }

    /// Creates an "action.completed" event.
    #[must_use]
    pub fn action_completed(
        run_id: Uuid,
        stage: &str,
        action: &str,
        status: &str,
        duration_ms: f64,
    ) -> Self {
        Self::new("action.completed")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("stage", serde_json::json!(stage))
            .add_data("action", serde_json::json!(action))
            .add_data("status", serde_json::json!(status))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates an "action.failed" event.
    #[must_use]
    pub fn action_failed(run_id: Uuid, stage: &str, action: &str, kind: &str, error: &str) -> Self {
        Self::new("action.failed")
            .add_data("run_id", serde_json::json!(run_id.to_string()))
            .add_data("stage", serde_json::json!(stage))
            .add_data("action", serde_json::json!(action))
            .add_data("error_kind", serde_json::json!(kind))
            .add_data("error", serde_json::json!(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_started_event() {
        let run_id = Uuid::new_v4();
        let event = PipelineEvent::stage_started(run_id, "Pre-Prod");

        assert_eq!(event.event_type, "stage.started");
        assert_eq!(event.data.get("stage"), Some(&serde_json::json!("Pre-Prod")));
        assert_eq!(
            event.data.get("run_id"),
            Some(&serde_json::json!(run_id.to_string()))
        );
    }

    #[test]
    fn test_event_to_json() {
        let event = PipelineEvent::action_failed(
            Uuid::new_v4(),
            "Build",
            "Synth",
            "BuildFailed",
            "exit 1",
        );
        let json = event.to_json();

        assert_eq!(json["type"], "action.failed");
        assert_eq!(json["data"]["error_kind"], "BuildFailed");
    }

    #[test]
    fn test_event_serialization_renames_type() {
        let event = PipelineEvent::new("pipeline.started");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"pipeline.started""#));
    }
}
