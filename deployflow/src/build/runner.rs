//! Build runner: commands in, derived artifact out.

use super::{CommandRunner, SynthConfig};
use crate::artifacts::ArtifactStore;
use crate::core::{Artifact, ArtifactBundle};
use crate::errors::DeployflowError;
use crate::utils::scratch_dir;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs a command sequence against a source artifact and publishes the result.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn ArtifactStore>,
    output_dir: Option<String>,
    artifact_name: String,
    produced_by: String,
    env: BTreeMap<String, String>,
}

impl BuildRunner {
    /// Creates a runner collecting `cdk.out` into a `cloud_assembly` artifact.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, store: Arc<dyn ArtifactStore>) -> Self {
        let defaults = SynthConfig::default();
        Self {
            runner,
            store,
            output_dir: defaults.output_dir,
            artifact_name: defaults.artifact,
            produced_by: "Build/Synth".to_string(),
            env: BTreeMap::new(),
        }
    }

    /// Creates a runner configured from a [`SynthConfig`].
    #[must_use]
    pub fn from_config(
        config: &SynthConfig,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self::new(runner, store)
            .with_output_dir(config.output_dir.clone())
            .with_artifact_name(config.artifact.clone())
            .with_env(config.env())
    }

    /// Sets the collected output directory (`None` collects the whole workspace).
    #[must_use]
    pub fn with_output_dir(mut self, dir: Option<String>) -> Self {
        self.output_dir = dir;
        self
    }

    /// Sets the logical name of the derived artifact.
    #[must_use]
    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    /// Sets the producer recorded on the derived artifact.
    #[must_use]
    pub fn with_produced_by(mut self, produced_by: impl Into<String>) -> Self {
        self.produced_by = produced_by.into();
        self
    }

    /// Sets environment variables exported to every command.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Returns the logical name of the derived artifact.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    /// Runs `commands` in order against `source` and publishes the output.
    ///
    /// Nothing is published unless every command exits zero.
    ///
    /// # Errors
    ///
    /// - [`DeployflowError::MissingArtifact`] if the source content is not in the store
    /// - [`DeployflowError::BuildFailed`] for the first command exiting non-zero
    /// - [`DeployflowError::BuildOutputMissing`] if the output directory was not created
    pub async fn synthesize(
        &self,
        source: &Artifact,
        commands: &[String],
    ) -> Result<Artifact, DeployflowError> {
        let bundle = self.store.get(source).await?;
        let workspace = scratch_dir().await?;
        bundle.unpack(workspace.path().to_path_buf()).await?;

        for command in commands {
            let outcome = self.runner.run(command, workspace.path(), &self.env).await?;
            if !outcome.success() {
                warn!(
                    command = %command,
                    exit_code = outcome.exit_code,
                    stderr = %outcome.stderr.trim_end(),
                    "build command failed"
                );
                return Err(DeployflowError::build_failed(command, outcome.exit_code));
            }
        }

        let root = match &self.output_dir {
            Some(dir) => {
                let path = workspace.path().join(dir);
                let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
                if !is_dir {
                    return Err(DeployflowError::BuildOutputMissing { path: dir.clone() });
                }
                path
            }
            None => workspace.path().to_path_buf(),
        };
        let collected = ArtifactBundle::collect(root).await?;

        let artifact = self
            .store
            .put(&self.artifact_name, &self.produced_by, collected)
            .await?;
        info!(
            artifact = %artifact.name,
            files = artifact.file_count,
            commands = commands.len(),
            "build published"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::testing::ScriptedCommandRunner;
    use pretty_assertions::assert_eq;

    async fn source(store: &InMemoryArtifactStore) -> Artifact {
        store
            .put(
                "source",
                "Source/Checkout",
                ArtifactBundle::new()
                    .with_file("package.json", "{}")
                    .with_file("bin/app.ts", "new App()"),
            )
            .await
            .unwrap()
    }

    fn commands(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_synthesize_collects_output_dir() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .writes_file("npx cdk synth", "cdk.out/Prod-WebService.template.json", "{}")
                .writes_file("npx cdk synth", "cdk.out/manifest.json", r#"{"version":"5"}"#),
        );
        let build = BuildRunner::new(runner.clone(), store.clone());
        let src = source(&store).await;

        let artifact = build
            .synthesize(&src, &commands(&["npm ci", "npx cdk synth"]))
            .await
            .unwrap();

        assert_eq!(artifact.name, "cloud_assembly");
        assert_eq!(artifact.produced_by, "Build/Synth");
        let bundle = store.get(&artifact).await.unwrap();
        assert_eq!(
            bundle.paths().collect::<Vec<_>>(),
            vec!["Prod-WebService.template.json", "manifest.json"]
        );
        assert_eq!(runner.commands(), vec!["npm ci", "npx cdk synth"]);
    }

    #[tokio::test]
    async fn test_commands_see_source_tree() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let runner = Arc::new(ScriptedCommandRunner::new());
        let build = BuildRunner::new(runner.clone(), store.clone()).with_output_dir(None);
        let src = source(&store).await;

        build.synthesize(&src, &commands(&["npm ci"])).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].files, vec!["bin/app.ts", "package.json"]);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_sequence() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let runner = Arc::new(ScriptedCommandRunner::new().exits_with("npm run build", 1));
        let build = BuildRunner::new(runner.clone(), store.clone());
        let src = source(&store).await;
        let before = store.len();

        let err = build
            .synthesize(&src, &commands(&["npm install", "npm run build", "npm test"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployflowError::BuildFailed { ref command, exit_code: 1 } if command == "npm run build"
        ));
        assert_eq!(runner.commands(), vec!["npm install", "npm run build"]);
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn test_missing_output_dir() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let build = BuildRunner::new(Arc::new(ScriptedCommandRunner::new()), store.clone());
        let src = source(&store).await;

        let err = build
            .synthesize(&src, &commands(&["npx cdk synth"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BuildOutputMissing");
    }

    #[tokio::test]
    async fn test_env_from_config_reaches_commands() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let runner = Arc::new(ScriptedCommandRunner::new());
        let config = SynthConfig::new().with_cli_version("1.62.0");
        let build = BuildRunner::from_config(&config, runner.clone(), store.clone())
            .with_output_dir(None);
        let src = source(&store).await;

        build.synthesize(&src, &config.commands()).await.unwrap();

        for call in runner.calls() {
            assert_eq!(call.env.get("CDK_CLI_VERSION").map(String::as_str), Some("1.62.0"));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_shell_build() {
        use crate::build::ShellCommandRunner;

        let store = Arc::new(InMemoryArtifactStore::new());
        let build = BuildRunner::new(Arc::new(ShellCommandRunner::default()), store.clone())
            .with_output_dir(Some("dist".to_string()));
        let src = source(&store).await;

        let artifact = build
            .synthesize(&src, &commands(&["mkdir -p dist", "cp package.json dist/"]))
            .await
            .unwrap();

        let bundle = store.get(&artifact).await.unwrap();
        assert_eq!(bundle.get("package.json"), Some(&b"{}"[..]));
    }
}
