//! Source trigger: webhook/poll filtering and snapshot materialization.

use super::{SourceProvider, TriggerEvent};
use crate::artifacts::ArtifactStore;
use crate::core::Artifact;
use crate::errors::DeployflowError;
use crate::secrets::SecretResolver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Where the pipeline's source lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Branch that triggers the pipeline.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the secret holding the access token.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    /// Logical name of the artifact the snapshot is published as.
    #[serde(default = "default_artifact")]
    pub artifact: String,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_token_secret() -> String {
    "github-token".to_string()
}

fn default_artifact() -> String {
    "source".to_string()
}

impl SourceConfig {
    /// Creates a configuration with default branch, secret and artifact names.
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
            token_secret: default_token_secret(),
            artifact: default_artifact(),
        }
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Sets the token secret name.
    #[must_use]
    pub fn with_token_secret(mut self, name: impl Into<String>) -> Self {
        self.token_secret = name.into();
        self
    }

    /// Returns the repository identifier, `owner/repo`.
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Turns version-control activity into source artifacts.
#[derive(Debug)]
pub struct SourceTrigger {
    config: SourceConfig,
    provider: Arc<dyn SourceProvider>,
    store: Arc<dyn ArtifactStore>,
    last_seen: Mutex<Option<String>>,
}

impl SourceTrigger {
    /// Creates a trigger.
    #[must_use]
    pub fn new(
        config: SourceConfig,
        provider: Arc<dyn SourceProvider>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            last_seen: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Returns the logical name of the source artifact.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        &self.config.artifact
    }

    /// Returns true if the event targets this trigger's repository and branch.
    #[must_use]
    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        event.repository == self.config.repository() && event.branch == self.config.branch
    }

    /// Polls the provider for a new head commit.
    ///
    /// Returns `Some` only when the head differs from the last commit this
    /// trigger has seen (through polling or materialization).
    ///
    /// # Errors
    ///
    /// Propagates secret and provider errors.
    pub async fn poll(
        &self,
        secrets: &dyn SecretResolver,
    ) -> Result<Option<TriggerEvent>, DeployflowError> {
        let token = secrets.resolve(&self.config.token_secret).await?;
        let repository = self.config.repository();
        let head = self
            .provider
            .head(&repository, &self.config.branch, &token)
            .await?;

        let mut last_seen = self.last_seen.lock();
        if last_seen.as_deref() == Some(head.as_str()) {
            debug!(repository = %repository, commit = %head, "no new commit");
            return Ok(None);
        }
        *last_seen = Some(head.clone());
        drop(last_seen);

        info!(repository = %repository, branch = %self.config.branch, commit = %head, "new commit detected");
        Ok(Some(TriggerEvent::new(repository, self.config.branch.clone(), head)))
    }

    /// Checks the event's commit out and publishes it as the source artifact.
    ///
    /// # Errors
    ///
    /// Returns a source error if the event is for another repository or branch,
    /// and propagates secret, provider and store errors.
    pub async fn materialize(
        &self,
        event: &TriggerEvent,
        secrets: &dyn SecretResolver,
        produced_by: &str,
    ) -> Result<Artifact, DeployflowError> {
        if !self.accepts(event) {
            return Err(DeployflowError::Source(format!(
                "trigger for {}@{} does not accept {}@{}",
                self.config.repository(),
                self.config.branch,
                event.repository,
                event.branch
            )));
        }

        let token = secrets.resolve(&self.config.token_secret).await?;
        let bundle = self
            .provider
            .checkout(&event.repository, &event.commit, &token)
            .await?;
        let artifact = self
            .store
            .put(&self.config.artifact, produced_by, bundle)
            .await?;

        *self.last_seen.lock() = Some(event.commit.clone());
        info!(
            repository = %event.repository,
            commit = %event.commit,
            files = artifact.file_count,
            "source materialized"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::core::ArtifactBundle;
    use crate::secrets::StaticSecretResolver;
    use crate::testing::StaticSourceProvider;
    use pretty_assertions::assert_eq;

    fn fixture() -> (SourceTrigger, Arc<StaticSourceProvider>, Arc<InMemoryArtifactStore>) {
        let provider = Arc::new(
            StaticSourceProvider::new()
                .with_token("t0ken")
                .with_snapshot("abc123", ArtifactBundle::new().with_file("package.json", "{}")),
        );
        provider.set_head("acme/webservice", "master", "abc123");
        let store = Arc::new(InMemoryArtifactStore::new());
        let trigger = SourceTrigger::new(
            SourceConfig::new("acme", "webservice"),
            provider.clone(),
            store.clone(),
        );
        (trigger, provider, store)
    }

    fn secrets() -> StaticSecretResolver {
        StaticSecretResolver::new().with_secret("github-token", "t0ken")
    }

    #[test]
    fn test_source_config_defaults_from_json() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"owner": "acme", "repo": "webservice"}"#).unwrap();
        assert_eq!(config, SourceConfig::new("acme", "webservice"));
        assert_eq!(config.repository(), "acme/webservice");
        assert_eq!(config.token_secret, "github-token");
    }

    #[test]
    fn test_accepts_filters_repository_and_branch() {
        let (trigger, _, _) = fixture();
        assert!(trigger.accepts(&TriggerEvent::new("acme/webservice", "master", "x")));
        assert!(!trigger.accepts(&TriggerEvent::new("acme/webservice", "feature", "x")));
        assert!(!trigger.accepts(&TriggerEvent::new("acme/other", "master", "x")));
    }

    #[tokio::test]
    async fn test_poll_reports_each_commit_once() {
        let (trigger, provider, _) = fixture();

        let first = trigger.poll(&secrets()).await.unwrap();
        assert_eq!(first, Some(TriggerEvent::new("acme/webservice", "master", "abc123")));
        assert_eq!(trigger.poll(&secrets()).await.unwrap(), None);

        provider.set_head("acme/webservice", "master", "def456");
        let next = trigger.poll(&secrets()).await.unwrap().unwrap();
        assert_eq!(next.commit, "def456");
    }

    #[tokio::test]
    async fn test_materialize_publishes_source_artifact() {
        let (trigger, _, store) = fixture();
        let event = TriggerEvent::new("acme/webservice", "master", "abc123");

        let artifact = trigger
            .materialize(&event, &secrets(), "Source/Checkout")
            .await
            .unwrap();

        assert_eq!(artifact.name, "source");
        assert_eq!(artifact.produced_by, "Source/Checkout");
        let bundle = store.get(&artifact).await.unwrap();
        assert_eq!(bundle.get("package.json"), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn test_materialize_rejects_foreign_branch() {
        let (trigger, _, _) = fixture();
        let event = TriggerEvent::new("acme/webservice", "feature", "abc123");

        let err = trigger
            .materialize(&event, &secrets(), "Source/Checkout")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Source");
    }

    #[tokio::test]
    async fn test_materialize_with_wrong_token_fails() {
        let (trigger, _, _) = fixture();
        let event = TriggerEvent::new("acme/webservice", "master", "abc123");
        let wrong = StaticSecretResolver::new().with_secret("github-token", "nope");

        let err = trigger
            .materialize(&event, &wrong, "Source/Checkout")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Source");
    }
}
