//! Run records: the observable state of one pipeline execution.

use super::Pipeline;
use crate::core::{ActionKind, ActionStatus, Artifact, RunStatus, StageStatus};
use crate::errors::DeployflowError;
use crate::source::TriggerEvent;
use crate::utils::{now_utc, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// State of one action within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    /// The action name.
    pub name: String,
    /// The action kind.
    pub kind: ActionKind,
    /// The action's run-order.
    pub run_order: u32,
    /// Current status.
    pub status: ActionStatus,
    /// When execution started.
    pub started_at: Option<Timestamp>,
    /// When execution reached a terminal status.
    pub finished_at: Option<Timestamp>,
    /// Outputs the action produced.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Error message, for failed or cancelled actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    /// The stage name.
    pub name: String,
    /// Current status.
    pub status: StageStatus,
    /// Per-action state, in run-order.
    pub actions: Vec<ActionRecord>,
}

impl StageRecord {
    /// Returns the record of an action.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionRecord> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub(crate) fn action_mut(&mut self, name: &str) -> Option<&mut ActionRecord> {
        self.actions.iter_mut().find(|a| a.name == name)
    }

    /// Aggregates the action statuses, worst status wins.
    #[must_use]
    pub fn aggregate_status(&self) -> StageStatus {
        ActionStatus::aggregate(self.actions.iter().map(|a| a.status))
            .map_or(StageStatus::NotStarted, StageStatus::from)
    }
}

/// One execution of a pipeline.
///
/// Written only by the sequencer; callers get a finished copy in the
/// [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Name of the executed pipeline.
    pub pipeline: String,
    /// The event that started the run.
    pub trigger: TriggerEvent,
    /// Overall status.
    pub status: RunStatus,
    /// The stage being executed, or the one that ended the run.
    pub current_stage: Option<String>,
    /// Per-stage state, in execution order.
    pub stages: Vec<StageRecord>,
    /// Every output produced, keyed by `Stage.KEY`.
    pub outputs: BTreeMap<String, String>,
    /// Artifacts produced in this run, keyed by logical name.
    pub artifacts: BTreeMap<String, Artifact>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run reached a terminal status.
    pub finished_at: Option<Timestamp>,
}

impl PipelineRun {
    /// Creates a fresh run with every stage `NotStarted` and every action `Pending`.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline: &Pipeline, trigger: TriggerEvent) -> Self {
        let stages = pipeline
            .stages()
            .iter()
            .map(|stage| StageRecord {
                name: stage.name.clone(),
                status: StageStatus::NotStarted,
                actions: stage
                    .actions
                    .iter()
                    .map(|action| ActionRecord {
                        name: action.name.clone(),
                        kind: action.kind(),
                        run_order: action.run_order,
                        status: ActionStatus::Pending,
                        started_at: None,
                        finished_at: None,
                        outputs: BTreeMap::new(),
                        error: None,
                    })
                    .collect(),
            })
            .collect();

        Self {
            run_id,
            pipeline: pipeline.name().to_string(),
            trigger,
            status: RunStatus::Running,
            current_stage: None,
            stages,
            outputs: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            started_at: now_utc(),
            finished_at: None,
        }
    }

    /// Returns the record of a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub(crate) fn stage_mut(&mut self, name: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Returns the status of a stage (`NotStarted` for unknown stages).
    #[must_use]
    pub fn stage_status(&self, name: &str) -> StageStatus {
        self.stage(name).map_or(StageStatus::NotStarted, |s| s.status)
    }

    /// Returns the record of an action.
    #[must_use]
    pub fn action(&self, stage: &str, action: &str) -> Option<&ActionRecord> {
        self.stage(stage).and_then(|s| s.action(action))
    }

    /// Returns an output value by `Stage.KEY`.
    #[must_use]
    pub fn output(&self, reference: &str) -> Option<&str> {
        self.outputs.get(reference).map(String::as_str)
    }

    /// Adds an artifact to the run's artifact table.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::ArtifactConflict`] if the name was already produced.
    pub(crate) fn record_artifact(&mut self, artifact: Artifact) -> Result<(), DeployflowError> {
        if self.artifacts.contains_key(&artifact.name) {
            return Err(DeployflowError::ArtifactConflict(artifact.name));
        }
        self.artifacts.insert(artifact.name.clone(), artifact);
        Ok(())
    }

    /// Moves the run to a terminal status.
    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(now_utc());
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_ms(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(now_utc);
        (end - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }

    /// Serializes the run to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The result of [`StageSequencer::run`](super::StageSequencer::run).
#[derive(Debug)]
pub struct RunReport {
    /// The finished run.
    pub run: PipelineRun,
    /// The error that ended the run, if it did not succeed.
    pub error: Option<DeployflowError>,
}

impl RunReport {
    /// Returns the run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.run.status == RunStatus::Succeeded
    }

    /// Returns the error that ended the run.
    #[must_use]
    pub fn error(&self) -> Option<&DeployflowError> {
        self.error.as_ref()
    }

    /// Converts the report into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the run.
    pub fn into_result(self) -> Result<PipelineRun, DeployflowError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.run),
        }
    }
}
