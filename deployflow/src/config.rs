//! Declarative pipeline configuration.
//!
//! A [`PipelineConfig`] is plain data (usually JSON). Turning it into a
//! runnable [`Pipeline`] needs the external collaborators, which are only
//! bound in [`PipelineConfig::into_pipeline`].

use crate::actions::{
    ApprovalService, BuildAction, Deployer, ManualApprovalAction, ShellScriptAction,
};
use crate::artifacts::ArtifactStore;
use crate::build::{BuildRunner, CommandRunner, SynthConfig};
use crate::errors::{ContractErrorInfo, DeployflowError, PipelineValidationError};
use crate::observability::{self, LogFormat};
use crate::pipeline::{ActionSpec, OutputRef, Pipeline, PipelineBuilder, StageHandle};
use crate::source::{SourceConfig, SourceProvider, SourceTrigger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One deployable stack of an application stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    /// The stack name.
    pub name: String,
    /// Output keys the stack exposes after deployment (e.g. `SERVICE_URL`).
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl StackConfig {
    /// Creates a stack with no outputs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: Vec::new(),
        }
    }

    /// Declares an output key.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }
}

/// A shell step run after a stage's deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStepConfig {
    /// The action name.
    pub name: String,
    /// Commands, run in order.
    pub commands: Vec<String>,
    /// Artifacts unpacked into the step's workspace, first one at the root.
    #[serde(default)]
    pub additional_artifacts: Vec<String>,
    /// Environment variable → output reference.
    ///
    /// References are `Stage.KEY`; a bare `KEY` refers to the step's own stage.
    #[serde(default)]
    pub use_outputs: BTreeMap<String, String>,
}

/// One deployment stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// The stage name, also the deployment environment.
    pub name: String,
    /// Stacks deployed concurrently.
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
    /// Optional shell step after the deployments.
    #[serde(default)]
    pub integration_tests: Option<ShellStepConfig>,
    /// Gate the deployments behind a manual approval.
    #[serde(default)]
    pub require_approval: bool,
    /// Seconds to wait for the approval before failing; unset waits forever.
    #[serde(default)]
    pub approval_timeout_secs: Option<u64>,
}

impl StageConfig {
    /// Creates a stage with no stacks.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stacks: Vec::new(),
            integration_tests: None,
            require_approval: false,
            approval_timeout_secs: None,
        }
    }

    /// Adds a stack.
    #[must_use]
    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stacks.push(stack);
        self
    }

    /// Sets the integration test step.
    #[must_use]
    pub fn with_integration_tests(mut self, step: ShellStepConfig) -> Self {
        self.integration_tests = Some(step);
        self
    }

    /// Requires a manual approval before deploying.
    #[must_use]
    pub fn with_approval(mut self) -> Self {
        self.require_approval = true;
        self
    }
}

/// The whole pipeline: source, synthesis and deployment stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The pipeline name.
    pub name: String,
    /// Where the source lives.
    pub source: SourceConfig,
    /// The synthesis step.
    #[serde(default)]
    pub synth: SynthConfig,
    /// Deployment stages, in order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// The external collaborators a configuration is bound to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Version-control access.
    pub source: Arc<dyn SourceProvider>,
    /// Runs build and shell commands.
    pub commands: Arc<dyn CommandRunner>,
    /// The provisioning engine.
    pub deployer: Arc<dyn Deployer>,
    /// Where artifacts live.
    pub store: Arc<dyn ArtifactStore>,
    /// Needed only when a stage requires approval.
    pub approvals: Option<Arc<ApprovalService>>,
}

impl PipelineConfig {
    /// Creates a configuration with default synthesis and no deployment stages.
    #[must_use]
    pub fn new(name: impl Into<String>, source: SourceConfig) -> Self {
        Self {
            name: name.into(),
            source,
            synth: SynthConfig::default(),
            stages: Vec::new(),
            log_format: LogFormat::default(),
        }
    }

    /// Sets the synthesis step.
    #[must_use]
    pub fn with_synth(mut self, synth: SynthConfig) -> Self {
        self.synth = synth;
        self
    }

    /// Appends a deployment stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::Serialization`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, DeployflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a serialization error.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DeployflowError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Serializes the configuration to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn to_json_string(&self) -> Result<String, DeployflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Installs the global tracing subscriber in the configured log format.
    ///
    /// `RUST_LOG` takes precedence over `default_filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter is invalid or a subscriber is already set.
    pub fn init_tracing(&self, default_filter: &str) -> Result<(), DeployflowError> {
        observability::init_tracing(self.log_format, default_filter)
    }

    /// Binds the configuration to collaborators and builds the pipeline.
    ///
    /// Produces `Source`, `Build`, then one stage per [`StageConfig`]: an
    /// optional approval, the stack deployments, then the optional shell step,
    /// each at its own run-order.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the resulting definition is invalid or a
    /// stage requires approval without an [`ApprovalService`].
    pub fn into_pipeline(&self, collaborators: &Collaborators) -> Result<Pipeline, DeployflowError> {
        let mut builder = PipelineBuilder::new(&self.name);

        let trigger = SourceTrigger::new(
            self.source.clone(),
            Arc::clone(&collaborators.source),
            Arc::clone(&collaborators.store),
        );
        builder.add_source_stage(Arc::new(trigger));

        let runner = BuildRunner::from_config(
            &self.synth,
            Arc::clone(&collaborators.commands),
            Arc::clone(&collaborators.store),
        );
        builder.add_build_stage(BuildAction::new(
            runner,
            &self.source.artifact,
            self.synth.commands(),
        ));

        for stage in &self.stages {
            let handle = builder.add_stage(&stage.name);
            if stage.require_approval {
                add_approval(&mut builder, handle, stage, collaborators)?;
            }
            if !stage.stacks.is_empty() {
                builder.add_stacks(
                    handle,
                    &self.synth.artifact,
                    &stage.stacks,
                    &collaborators.deployer,
                );
            }
            if let Some(step) = &stage.integration_tests {
                add_shell_step(&mut builder, handle, &stage.name, step, collaborators)?;
            }
        }

        Ok(builder.build()?)
    }
}

fn add_approval(
    builder: &mut PipelineBuilder,
    handle: StageHandle,
    stage: &StageConfig,
    collaborators: &Collaborators,
) -> Result<(), PipelineValidationError> {
    let Some(approvals) = &collaborators.approvals else {
        return Err(PipelineValidationError::new(format!(
            "Stage '{}' requires approval but no approval service was provided",
            stage.name
        ))
        .with_stages(vec![stage.name.clone()])
        .with_error_info(
            ContractErrorInfo::new("CONTRACT-DF-APPROVAL", "Approval service missing")
                .with_fix_hint("Set Collaborators::approvals or drop require_approval."),
        ));
    };

    let mut action =
        ManualApprovalAction::new(Arc::clone(approvals), format!("Promote to {}?", stage.name));
    if let Some(secs) = stage.approval_timeout_secs {
        action = action.with_timeout(Duration::from_secs(secs));
    }
    let run_order = builder.next_run_order(handle);
    builder.add_action(
        handle,
        ActionSpec::new("Approve", Arc::new(action)).with_run_order(run_order),
    );
    Ok(())
}

fn add_shell_step(
    builder: &mut PipelineBuilder,
    handle: StageHandle,
    stage: &str,
    step: &ShellStepConfig,
    collaborators: &Collaborators,
) -> Result<(), PipelineValidationError> {
    let action = step.additional_artifacts.iter().fold(
        ShellScriptAction::new(step.commands.clone(), Arc::clone(&collaborators.commands)),
        |action, artifact| action.with_artifact(artifact),
    );

    let run_order = builder.next_run_order(handle);
    let mut spec = ActionSpec::new(&step.name, Arc::new(action)).with_run_order(run_order);
    for artifact in &step.additional_artifacts {
        spec = spec.with_input(artifact);
    }
    for (env, reference) in &step.use_outputs {
        let reference = if reference.contains('.') {
            reference.parse()?
        } else {
            OutputRef::new(stage, reference)
        };
        spec = spec.use_output(env, reference);
    }
    builder.add_action(handle, spec);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::core::ActionKind;
    use crate::testing::{RecordingDeployer, ScriptedCommandRunner, StaticSourceProvider};
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"{
        "name": "webservice",
        "source": { "owner": "acme", "repo": "webservice" },
        "synth": { "build_command": "npm run build && npm test", "cli_version": "1.62.0" },
        "stages": [
            { "name": "Test", "stacks": [{ "name": "WebService" }] },
            {
                "name": "Pre-Prod",
                "stacks": [{ "name": "WebService", "outputs": ["SERVICE_URL"] }],
                "integration_tests": {
                    "name": "IntegrationTests",
                    "commands": ["npm install", "npm run build", "npm run integration"],
                    "additional_artifacts": ["source"],
                    "use_outputs": { "SERVICE_URL": "Pre-Prod.SERVICE_URL" }
                }
            },
            { "name": "Prod", "stacks": [{ "name": "WebService" }], "require_approval": true }
        ]
    }"#;

    #[test]
    fn test_log_format_drives_tracing_setup() {
        let config: PipelineConfig = PipelineConfig::from_json_str(
            r#"{
                "name": "webservice",
                "source": { "owner": "acme", "repo": "webservice" },
                "log_format": "json"
            }"#,
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        config.init_tracing("off").unwrap();
        let err = config.init_tracing("off").unwrap_err();
        assert!(err.to_string().contains("failed to install subscriber"));
    }

    fn collaborators(approvals: Option<Arc<ApprovalService>>) -> Collaborators {
        Collaborators {
            source: Arc::new(StaticSourceProvider::new()),
            commands: Arc::new(ScriptedCommandRunner::new()),
            deployer: Arc::new(RecordingDeployer::new()),
            store: Arc::new(InMemoryArtifactStore::new()),
            approvals,
        }
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = PipelineConfig::from_json_str(CONFIG).unwrap();

        assert_eq!(config.source.branch, "master");
        assert_eq!(config.source.token_secret, "github-token");
        assert_eq!(
            config.synth.commands(),
            vec!["npm ci", "npm run build && npm test", "npx cdk synth"]
        );
        assert_eq!(config.stages.len(), 3);
        assert!(config.stages[2].require_approval);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineConfig::from_json_str("{").unwrap_err();
        assert_eq!(err.kind(), "Serialization");
    }

    #[test]
    fn test_json_file_round_trip() {
        let config = PipelineConfig::from_json_str(CONFIG).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, config.to_json_string().unwrap()).unwrap();

        assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_into_pipeline_layout() {
        let config = PipelineConfig::from_json_str(CONFIG).unwrap();
        let pipeline = config
            .into_pipeline(&collaborators(Some(Arc::new(ApprovalService::new()))))
            .unwrap();

        assert_eq!(
            pipeline.stage_names(),
            vec!["Source", "Build", "Test", "Pre-Prod", "Prod"]
        );

        let pre_prod = pipeline.stage("Pre-Prod").unwrap();
        let deploy = pre_prod.action("WebService.Deploy").unwrap();
        let tests = pre_prod.action("IntegrationTests").unwrap();
        assert_eq!(deploy.run_order, 1);
        assert_eq!(tests.run_order, 2);
        assert_eq!(tests.kind(), ActionKind::ShellScript);
        assert_eq!(tests.inputs, vec!["source"]);
        assert_eq!(
            tests.use_outputs.get("SERVICE_URL"),
            Some(&OutputRef::new("Pre-Prod", "SERVICE_URL"))
        );

        let prod = pipeline.stage("Prod").unwrap();
        assert_eq!(prod.action("Approve").unwrap().kind(), ActionKind::ManualApproval);
        assert_eq!(prod.action("WebService.Deploy").unwrap().run_order, 2);
    }

    #[test]
    fn test_bare_output_key_refers_to_own_stage() {
        let config = PipelineConfig::new("webservice", SourceConfig::new("acme", "webservice"))
            .with_stage(
                StageConfig::new("Pre-Prod")
                    .with_stack(StackConfig::new("WebService").with_output("SERVICE_URL"))
                    .with_integration_tests(ShellStepConfig {
                        name: "IntegrationTests".to_string(),
                        commands: vec!["npm run integration".to_string()],
                        additional_artifacts: Vec::new(),
                        use_outputs: [("URL".to_string(), "SERVICE_URL".to_string())]
                            .into_iter()
                            .collect(),
                    }),
            );

        let pipeline = config.into_pipeline(&collaborators(None)).unwrap();
        let tests = pipeline.stage("Pre-Prod").unwrap().action("IntegrationTests").unwrap();
        assert_eq!(
            tests.use_outputs.get("URL"),
            Some(&OutputRef::new("Pre-Prod", "SERVICE_URL"))
        );
    }

    #[test]
    fn test_approval_requires_service() {
        let config = PipelineConfig::from_json_str(CONFIG).unwrap();
        let err = config.into_pipeline(&collaborators(None)).unwrap_err();

        match err {
            DeployflowError::Validation(e) => assert_eq!(e.code(), Some("CONTRACT-DF-APPROVAL")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_forward_binding_is_rejected() {
        let config = PipelineConfig::new("webservice", SourceConfig::new("acme", "webservice"))
            .with_stage(StageConfig::new("Test").with_integration_tests(ShellStepConfig {
                name: "Smoke".to_string(),
                commands: vec!["curl $URL".to_string()],
                additional_artifacts: Vec::new(),
                use_outputs: [("URL".to_string(), "Prod.SERVICE_URL".to_string())]
                    .into_iter()
                    .collect(),
            }))
            .with_stage(
                StageConfig::new("Prod")
                    .with_stack(StackConfig::new("WebService").with_output("SERVICE_URL")),
            );

        let err = config.into_pipeline(&collaborators(None)).unwrap_err();
        match err {
            DeployflowError::Validation(e) => {
                assert_eq!(e.code(), Some("CONTRACT-DF-FORWARD_REF"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
