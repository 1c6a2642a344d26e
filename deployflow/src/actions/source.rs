//! Source action.

use super::{Action, ActionContext};
use crate::core::{ActionKind, ActionResult};
use crate::errors::DeployflowError;
use crate::source::SourceTrigger;
use async_trait::async_trait;
use std::sync::Arc;

/// Materializes the triggering commit as the source artifact.
///
/// Outputs `COMMIT_ID` and `BRANCH_NAME`.
#[derive(Debug, Clone)]
pub struct SourceAction {
    trigger: Arc<SourceTrigger>,
}

impl SourceAction {
    /// Output key holding the commit reference.
    pub const COMMIT_ID: &'static str = "COMMIT_ID";
    /// Output key holding the branch name.
    pub const BRANCH_NAME: &'static str = "BRANCH_NAME";

    /// Creates a source action.
    #[must_use]
    pub fn new(trigger: Arc<SourceTrigger>) -> Self {
        Self { trigger }
    }

    /// Returns the logical name of the produced artifact.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        self.trigger.artifact_name()
    }
}

#[async_trait]
impl Action for SourceAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Source
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        let artifact = self
            .trigger
            .materialize(&ctx.trigger, ctx.secrets.as_ref(), &ctx.qualified_name())
            .await?;

        Ok(ActionResult::succeeded()
            .with_output(Self::COMMIT_ID, ctx.trigger.commit.clone())
            .with_output(Self::BRANCH_NAME, ctx.trigger.branch.clone())
            .with_artifact(artifact))
    }
}
