//! Build action.

use super::{Action, ActionContext};
use crate::build::BuildRunner;
use crate::core::{ActionKind, ActionResult};
use crate::errors::DeployflowError;
use async_trait::async_trait;

/// Runs the build commands against the source artifact.
#[derive(Debug, Clone)]
pub struct BuildAction {
    runner: BuildRunner,
    source: String,
    commands: Vec<String>,
}

impl BuildAction {
    /// Creates a build action reading the artifact named `source`.
    #[must_use]
    pub fn new(runner: BuildRunner, source: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            runner,
            source: source.into(),
            commands,
        }
    }

    /// Returns the consumed artifact name.
    #[must_use]
    pub fn source_artifact(&self) -> &str {
        &self.source
    }

    /// Returns the produced artifact name.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        self.runner.artifact_name()
    }

    /// Returns the build commands.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[async_trait]
impl Action for BuildAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Build
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        let source = ctx.input(&self.source)?;
        let artifact = self
            .runner
            .clone()
            .with_produced_by(ctx.qualified_name())
            .synthesize(source, &self.commands)
            .await?;

        Ok(ActionResult::succeeded().with_artifact(artifact))
    }
}
