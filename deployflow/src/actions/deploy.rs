//! Deploy action and the provisioning-engine seam.

use super::{Action, ActionContext};
use crate::core::{ActionKind, ActionResult, ArtifactBundle};
use crate::errors::DeployflowError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// The provisioning engine.
///
/// Deploys one stack of a synthesized assembly into an environment and
/// returns the stack's outputs (endpoint URLs, resource identifiers).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Deployer: Send + Sync + Debug {
    /// Deploys `stack` from `assembly` into `environment`.
    async fn deploy(
        &self,
        stack: &str,
        environment: &str,
        assembly: &ArtifactBundle,
    ) -> Result<BTreeMap<String, String>, DeployflowError>;
}

/// Deploys one stack from the build artifact.
#[derive(Debug, Clone)]
pub struct DeployAction {
    stack: String,
    assembly: String,
    deployer: Arc<dyn Deployer>,
}

impl DeployAction {
    /// Creates a deploy action for `stack`, reading the artifact named `assembly`.
    #[must_use]
    pub fn new(
        stack: impl Into<String>,
        assembly: impl Into<String>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            stack: stack.into(),
            assembly: assembly.into(),
            deployer,
        }
    }

    /// Returns the stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }
}

#[async_trait]
impl Action for DeployAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Deploy
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError> {
        let artifact = ctx.input(&self.assembly)?;
        let assembly = ctx.store.get(artifact).await?;

        let outputs = self
            .deployer
            .deploy(&self.stack, &ctx.stage, &assembly)
            .await
            .map_err(|e| match e {
                DeployflowError::Cancelled(_) | DeployflowError::ActionFailed { .. } => e,
                other => ctx.failure(other.to_string()),
            })?;

        info!(stage = %ctx.stage, stack = %self.stack, outputs = outputs.len(), "stack deployed");
        Ok(ActionResult::succeeded().with_outputs(outputs))
    }
}
