//! Action kinds and the status enums for actions, stages and runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Materializes a source snapshot.
    Source,
    /// Synthesizes deployable definitions from source.
    Build,
    /// Hands definitions to the provisioning engine.
    Deploy,
    /// Runs shell commands (e.g. integration tests).
    ShellScript,
    /// Waits for a human decision.
    ManualApproval,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::Deploy => write!(f, "deploy"),
            Self::ShellScript => write!(f, "shell_script"),
            Self::ManualApproval => write!(f, "manual_approval"),
        }
    }
}

/// The execution status of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Reported failure.
    Failed,
    /// Cancelled before completing.
    Cancelled,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ActionStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    // Failed > Cancelled > Succeeded; non-terminal states never win.
    fn severity(self) -> u8 {
        match self {
            Self::Pending | Self::Running => 0,
            Self::Succeeded => 1,
            Self::Cancelled => 2,
            Self::Failed => 3,
        }
    }

    /// Aggregates terminal statuses, worst status wins.
    ///
    /// Returns `None` when no status in the iterator is terminal.
    pub fn aggregate<I>(statuses: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        statuses
            .into_iter()
            .filter(Self::is_terminal)
            .max_by_key(|s| s.severity())
    }
}

/// The status of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The sequencer never reached this stage.
    #[default]
    NotStarted,
    /// Actions of this stage are executing.
    InProgress,
    /// Every action succeeded.
    Succeeded,
    /// At least one action failed.
    Failed,
    /// The run was cancelled while this stage was in progress.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<ActionStatus> for StageStatus {
    fn from(status: ActionStatus) -> Self {
        match status {
            ActionStatus::Pending => Self::NotStarted,
            ActionStatus::Running => Self::InProgress,
            ActionStatus::Succeeded => Self::Succeeded,
            ActionStatus::Failed => Self::Failed,
            ActionStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// The status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is executing.
    #[default]
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed; later stages never started.
    Failed,
    /// The run was cancelled; later stages never started.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}
