//! Shell script action.

use super::{Action, ActionContext};
use crate::build::CommandRunner;
use crate::core::{ActionKind, ActionResult};
use crate::errors::DeployflowError;
use crate::utils::scratch_dir;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs commands in a scratch workspace holding the action's input artifacts.
///
/// The first input artifact is unpacked at the workspace root; every further
/// one goes into a subdirectory named after the artifact. Output bindings
/// resolved for the action are exported as environment variables.
#[derive(Debug, Clone)]
pub struct ShellScriptAction {
    commands: Vec<String>,
    artifacts: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ShellScriptAction {
    /// Creates a shell script action.
    #[must_use]
    pub fn new(commands: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            commands,
            artifacts: Vec::new(),
            runner,
        }
    }

    /// Adds an artifact to unpack into the workspace.
    #[must_use]
    pub fn with_artifact(mut self, name: impl Into<String>) -> Self {
        self.artifacts.push(name.into());
        self
    }

    /// Returns the artifacts unpacked into the workspace.
    #[must_use]
    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }
}

#[async_trait]
impl Action for ShellScriptAction {
    fn kind(&self) -> ActionKind {
        ActionKind::ShellScript
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        let workspace = scratch_dir().await?;

        for (index, name) in self.artifacts.iter().enumerate() {
            let artifact = ctx.input(name)?;
            let bundle = ctx.store.get(artifact).await?;
            let target = if index == 0 {
                workspace.path().to_path_buf()
            } else {
                workspace.path().join(name)
            };
            bundle.unpack(target).await?;
        }

        for command in &self.commands {
            if ctx.cancel.is_cancelled() {
                return Err(DeployflowError::Cancelled(
                    ctx.cancel.reason().unwrap_or_default(),
                ));
            }

            let outcome = self.runner.run(command, workspace.path(), &ctx.env).await?;
            if !outcome.success() {
                warn!(
                    stage = %ctx.stage,
                    action = %ctx.action,
                    command = %command,
                    exit_code = outcome.exit_code,
                    "shell command failed"
                );
                return Err(ctx.failure(format!(
                    "command '{command}' exited with code {}",
                    outcome.exit_code
                )));
            }
        }

        info!(stage = %ctx.stage, action = %ctx.action, commands = self.commands.len(), "shell script succeeded");
        Ok(ActionResult::succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
    use crate::cancellation::CancellationToken;
    use crate::core::ArtifactBundle;
    use crate::secrets::StaticSecretResolver;
    use crate::source::TriggerEvent;
    use crate::testing::ScriptedCommandRunner;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, HashMap};
    use uuid::Uuid;

    async fn context(env: &[(&str, &str)]) -> ActionContext {
        let store = Arc::new(InMemoryArtifactStore::new());
        let source = store
            .put("source", "Source/Checkout", ArtifactBundle::new().with_file("package.json", "{}"))
            .await
            .unwrap();
        let assembly = store
            .put("cloud_assembly", "Build/Synth", ArtifactBundle::new().with_file("manifest.json", "{}"))
            .await
            .unwrap();
        ActionContext {
            run_id: Uuid::new_v4(),
            stage: "Pre-Prod".to_string(),
            action: "IntegrationTests".to_string(),
            trigger: TriggerEvent::new("acme/webservice", "master", "abc123"),
            inputs: [
                ("source".to_string(), source),
                ("cloud_assembly".to_string(), assembly),
            ]
            .into_iter()
            .collect::<HashMap<_, _>>(),
            env: env
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            store,
            secrets: Arc::new(StaticSecretResolver::new()),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    fn commands() -> Vec<String> {
        vec![
            "npm install".to_string(),
            "npm run build".to_string(),
            "npm run integration".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_env_bindings_and_workspace_layout() {
        let runner = Arc::new(ScriptedCommandRunner::new());
        let action = ShellScriptAction::new(commands(), runner.clone())
            .with_artifact("source")
            .with_artifact("cloud_assembly");

        action
            .execute(&context(&[("SERVICE_URL", "https://example.test")]).await)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2].env.get("SERVICE_URL").map(String::as_str),
            Some("https://example.test")
        );
        assert_eq!(calls[0].files, vec!["cloud_assembly/manifest.json", "package.json"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_action() {
        let runner = Arc::new(ScriptedCommandRunner::new().exits_with("npm run integration", 2));
        let action = ShellScriptAction::new(commands(), runner).with_artifact("source");

        let err = action.execute(&context(&[]).await).await.unwrap_err();
        assert!(matches!(err, DeployflowError::ActionFailed { ref reason, .. } if reason.contains("code 2")));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_command() {
        let runner = Arc::new(ScriptedCommandRunner::new());
        let action = ShellScriptAction::new(commands(), runner.clone());
        let ctx = context(&[]).await;
        ctx.cancel.cancel("operator");

        let err = action.execute(&ctx).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(runner.calls().is_empty());
    }
}
