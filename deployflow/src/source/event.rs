//! Trigger events.

use crate::errors::DeployflowError;
use serde::{Deserialize, Serialize};

/// A request to run the pipeline against one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Repository identifier, `owner/repo`.
    pub repository: String,
    /// Branch name, without any `refs/heads/` prefix.
    pub branch: String,
    /// Commit reference.
    pub commit: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    repository: String,
    #[serde(alias = "ref")]
    branch: String,
    #[serde(alias = "after")]
    commit: String,
}

impl TriggerEvent {
    /// Creates a trigger event.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: strip_ref(&branch.into()),
            commit: commit.into(),
        }
    }

    /// Parses a webhook payload.
    ///
    /// Accepts `{"repository", "branch", "commit"}`; `ref` and `after` are
    /// accepted as aliases, and a `refs/heads/` prefix is stripped.
    ///
    /// # Errors
    ///
    /// Returns a serialization error on malformed payloads and a source error
    /// when a field is empty.
    pub fn from_webhook_json(payload: &str) -> Result<Self, DeployflowError> {
        let parsed: WebhookPayload = serde_json::from_str(payload)?;
        let event = Self::new(parsed.repository, parsed.branch, parsed.commit);

        if event.repository.is_empty() || event.branch.is_empty() || event.commit.is_empty() {
            return Err(DeployflowError::Source(
                "webhook payload has an empty repository, branch or commit".to_string(),
            ));
        }

        Ok(event)
    }
}

fn strip_ref(branch: &str) -> String {
    branch
        .strip_prefix("refs/heads/")
        .unwrap_or(branch)
        .to_string()
}
