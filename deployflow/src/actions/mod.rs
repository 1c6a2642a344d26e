//! Actions and the executor that runs them.
//!
//! Actions are the units of work inside a stage. Each variant lives in its
//! own module:
//! - [`SourceAction`] materializes the triggering commit
//! - [`BuildAction`] synthesizes deployable definitions
//! - [`DeployAction`] hands definitions to the provisioning engine
//! - [`ShellScriptAction`] runs commands (e.g. integration tests)
//! - [`ManualApprovalAction`] waits for a human decision

mod approval;
mod build;
mod deploy;
mod shell;
mod source;

pub use approval::{ApprovalRequestInfo, ApprovalService, ManualApprovalAction};
pub use build::BuildAction;
pub use deploy::{DeployAction, Deployer};
pub use shell::ShellScriptAction;
pub use source::SourceAction;

use crate::artifacts::ArtifactStore;
use crate::cancellation::CancellationToken;
use crate::core::{ActionKind, ActionResult, ActionStatus, Artifact};
use crate::errors::DeployflowError;
use crate::pipeline::ActionSpec;
use crate::secrets::SecretResolver;
use crate::source::TriggerEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything an action may read while it executes.
#[derive(Clone)]
pub struct ActionContext {
    /// The run this execution belongs to.
    pub run_id: Uuid,
    /// The stage holding the action.
    pub stage: String,
    /// The action name.
    pub action: String,
    /// The event that started the run.
    pub trigger: TriggerEvent,
    /// Input artifacts available to the action, by logical name.
    pub inputs: HashMap<String, Artifact>,
    /// Resolved output bindings, exposed as environment variables.
    pub env: BTreeMap<String, String>,
    /// Where artifact contents live.
    pub store: Arc<dyn ArtifactStore>,
    /// Run-scoped secret lookup.
    pub secrets: Arc<dyn SecretResolver>,
    /// Cancellation for the whole run.
    pub cancel: Arc<CancellationToken>,
}

impl ActionContext {
    /// Returns `stage/action`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.stage, self.action)
    }

    /// Returns an input artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::MissingArtifact`] if the input is absent.
    pub fn input(&self, name: &str) -> Result<&Artifact, DeployflowError> {
        self.inputs
            .get(name)
            .ok_or_else(|| DeployflowError::missing_artifact(name, self.qualified_name()))
    }

    /// Builds an [`DeployflowError::ActionFailed`] for this action.
    #[must_use]
    pub fn failure(&self, reason: impl Into<String>) -> DeployflowError {
        DeployflowError::action_failed(&self.stage, &self.action, reason)
    }
}

impl Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("run_id", &self.run_id)
            .field("stage", &self.stage)
            .field("action", &self.action)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A single unit of executable work.
///
/// Side effects are external. Implementations own any retry or timeout
/// policy; the executor calls `execute` at most once per run.
#[async_trait]
pub trait Action: Send + Sync + Debug {
    /// Returns the kind of work this action performs.
    fn kind(&self) -> ActionKind;

    /// Executes the action.
    ///
    /// # Errors
    ///
    /// Any error fails the action (or cancels it, for
    /// [`DeployflowError::Cancelled`]).
    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult, DeployflowError>;
}

/// Runs one action with its pre- and post-conditions enforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Executes `spec` in `ctx`.
    ///
    /// Before invocation every declared input must be present in the context
    /// and in the store. After a successful invocation every declared output
    /// key and produced artifact must be present in the result.
    ///
    /// # Errors
    ///
    /// - [`DeployflowError::MissingArtifact`] if an input is absent
    /// - [`DeployflowError::ActionFailed`] if the result breaks the declaration
    /// - any error returned by the action itself
    pub async fn execute(
        &self,
        spec: &ActionSpec,
        ctx: &ActionContext,
    ) -> Result<ActionResult, DeployflowError> {
        for input in &spec.inputs {
            let artifact = ctx.input(input)?;
            if !ctx.store.contains(artifact).await {
                return Err(DeployflowError::missing_artifact(input, ctx.qualified_name()));
            }
        }

        debug!(stage = %ctx.stage, action = %ctx.action, kind = %spec.kind(), "executing action");
        let result = spec.runner.execute(ctx).await?;

        if result.status == ActionStatus::Cancelled {
            return Ok(result);
        }
        if result.status != ActionStatus::Succeeded {
            return Err(ctx.failure(format!("action finished with status {}", result.status)));
        }

        for key in &spec.outputs {
            if !result.outputs.contains_key(key) {
                warn!(stage = %ctx.stage, action = %ctx.action, key = %key, "declared output missing");
                return Err(ctx.failure(format!("declared output '{key}' was not produced")));
            }
        }

        for name in &spec.produces {
            if !result.artifacts.iter().any(|a| &a.name == name) {
                return Err(ctx.failure(format!("declared artifact '{name}' was not produced")));
            }
        }
        if let Some(extra) = result
            .artifacts
            .iter()
            .find(|a| !spec.produces.contains(&a.name))
        {
            return Err(ctx.failure(format!("artifact '{}' was not declared", extra.name)));
        }

        Ok(result)
    }
}
