//! The result an action hands back to the sequencer.

use super::{ActionStatus, Artifact};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The outcome of a successful (or cooperatively cancelled) action.
///
/// Failures are reported as `Err(DeployflowError)` instead; the executor never
/// sees a partial success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    /// The terminal status of the action.
    pub status: ActionStatus,
    /// Named output values, e.g. `SERVICE_URL`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Artifacts published by the action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for ActionResult {
    fn default() -> Self {
        Self::succeeded()
    }
}

impl ActionResult {
    /// Creates a successful result with no outputs.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            status: ActionStatus::Succeeded,
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            message: None,
        }
    }

    /// Creates a cancelled result.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Cancelled,
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            message: Some(reason.into()),
        }
    }

    /// Adds a single output value.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    /// Adds several output values.
    #[must_use]
    pub fn with_outputs<I, K, V>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.outputs
            .extend(outputs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds a published artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}
