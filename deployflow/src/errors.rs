//! Error types for the deployflow orchestrator.
//!
//! Every error that reaches the sequencer is fatal to the current run. Nothing
//! here is retried by the orchestrator; errors are recorded on the run report
//! and surfaced to whoever re-triggers the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployflowError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A referenced input artifact was never produced (or is gone from the store).
    #[error("Missing artifact '{artifact}' required by {consumer}")]
    MissingArtifact {
        /// The logical artifact name.
        artifact: String,
        /// The consumer that asked for it (`stage/action` or a component name).
        consumer: String,
    },

    /// A build command exited non-zero.
    #[error("Build failed: command '{command}' exited with code {exit_code}")]
    BuildFailed {
        /// The command that failed.
        command: String,
        /// Its exit code (`-1` when terminated by a signal).
        exit_code: i32,
    },

    /// The build finished but its configured output directory does not exist.
    #[error("Build output directory '{path}' was not produced")]
    BuildOutputMissing {
        /// The expected directory, relative to the build workspace.
        path: String,
    },

    /// An external action reported failure.
    #[error("Action '{stage}/{action}' failed: {reason}")]
    ActionFailed {
        /// The stage holding the action.
        stage: String,
        /// The action name.
        action: String,
        /// Why it failed.
        reason: String,
    },

    /// An output was read before the action producing it had run.
    #[error("Forward reference: {consumer} reads output '{key}' of stage '{stage}' before it was produced")]
    ForwardReference {
        /// The reading action (`stage/action`).
        consumer: String,
        /// The stage expected to produce the output.
        stage: String,
        /// The output key.
        key: String,
    },

    /// An output key was produced twice in the same run.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// An artifact name was produced twice in the same run.
    #[error("Artifact conflict: '{0}' was already produced in this run")]
    ArtifactConflict(String),

    /// A secret lookup failed.
    #[error("Secret '{name}' could not be resolved: {reason}")]
    Secret {
        /// The secret name.
        name: String,
        /// Why it could not be resolved.
        reason: String,
    },

    /// The source provider rejected or failed a request.
    #[error("Source error: {0}")]
    Source(String),

    /// The run was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployflowError {
    /// Creates a missing artifact error.
    #[must_use]
    pub fn missing_artifact(artifact: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self::MissingArtifact {
            artifact: artifact.into(),
            consumer: consumer.into(),
        }
    }

    /// Creates a build failed error.
    #[must_use]
    pub fn build_failed(command: impl Into<String>, exit_code: i32) -> Self {
        Self::BuildFailed {
            command: command.into(),
            exit_code,
        }
    }

    /// Creates an action failed error.
    #[must_use]
    pub fn action_failed(
        stage: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ActionFailed {
            stage: stage.into(),
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Creates a forward reference error.
    #[must_use]
    pub fn forward_reference(
        consumer: impl Into<String>,
        stage: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::ForwardReference {
            consumer: consumer.into(),
            stage: stage.into(),
            key: key.into(),
        }
    }

    /// Returns a stable name for the error kind, used in events and reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation",
            Self::MissingArtifact { .. } => "MissingArtifact",
            Self::BuildFailed { .. } => "BuildFailed",
            Self::BuildOutputMissing { .. } => "BuildOutputMissing",
            Self::ActionFailed { .. } => "ActionFailed",
            Self::ForwardReference { .. } => "ForwardReference",
            Self::OutputConflict(_) => "OutputConflict",
            Self::ArtifactConflict(_) => "ArtifactConflict",
            Self::Secret { .. } => "Secret",
            Self::Source(_) => "Source",
            Self::Cancelled(_) => "Cancelled",
            Self::Internal(_) => "Internal",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
        }
    }

    /// Returns true if this error represents a cancellation rather than a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<serde_json::Error> for DeployflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-DF-FORWARD_REF").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when an output key is written twice for the same stage.
#[derive(Debug, Clone, Error)]
#[error("Output conflict for stage '{stage}': key '{key}' was already produced")]
pub struct OutputConflictError {
    /// The stage name.
    pub stage: String,
    /// The conflicting key.
    pub key: String,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

/// Provides default suggestions for contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-DF-EMPTY" => Some("Add at least one stage to the pipeline before building."),
            "CONTRACT-DF-NAME" => Some(
                "Stage and action names may only contain letters, digits, '.', '@', '_' and '-' \
                 and must be 1 to 100 characters long.",
            ),
            "CONTRACT-DF-DUPLICATE" => Some(
                "Stage names must be unique per pipeline; action names, artifact names and \
                 output keys must be unique per stage.",
            ),
            "CONTRACT-DF-RUN_ORDER" => Some("Run-order values start at 1. Use next_run_order()."),
            "CONTRACT-DF-FORWARD_REF" => Some(
                "Outputs can only be consumed from an earlier stage, or from the same stage \
                 at a higher run-order than the producing action.",
            ),
            "CONTRACT-DF-MISSING_ARTIFACT" => Some(
                "Every input artifact must be produced by an action that runs before the consumer.",
            ),
            "CONTRACT-DF-APPROVAL" => {
                Some("Stages that require approval need an approval service to wait on.")
            }
            _ => None,
        }
    }
}
