//! Pipeline builder with validation.

use super::{ActionSpec, OutputRef, Pipeline, RunOrderCounter, StageDefinition};
use crate::actions::{BuildAction, DeployAction, Deployer, SourceAction};
use crate::config::StackConfig;
use crate::errors::{ContractErrorInfo, ContractSuggestions, PipelineValidationError};
use crate::source::SourceTrigger;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.@_-]{1,100}$").expect("name pattern is valid"));

/// Name of the stage created by [`PipelineBuilder::add_source_stage`].
pub const SOURCE_STAGE: &str = "Source";
/// Name of the stage created by [`PipelineBuilder::add_build_stage`].
pub const BUILD_STAGE: &str = "Build";

/// Opaque reference to a stage added to a [`PipelineBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageHandle(usize);

#[derive(Debug, Clone)]
struct StageDraft {
    name: String,
    counter: RunOrderCounter,
    actions: Vec<ActionSpec>,
}

/// Builder for creating validated, immutable pipelines.
///
/// Stages run in the order they are added. Nothing is checked until
/// [`build`](Self::build), which validates the whole definition at once.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDraft>,
    unknown_handles: Vec<StageHandle>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            unknown_handles: Vec::new(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a stage.
    pub fn add_stage(&mut self, name: impl Into<String>) -> StageHandle {
        self.stages.push(StageDraft {
            name: name.into(),
            counter: RunOrderCounter::new(),
            actions: Vec::new(),
        });
        StageHandle(self.stages.len() - 1)
    }

    /// Returns the next run-order for the stage.
    ///
    /// Strictly increasing per stage, starting at 1. Returns 0 for a handle
    /// that belongs to another builder, which [`build`](Self::build) rejects.
    pub fn next_run_order(&mut self, stage: StageHandle) -> u32 {
        match self.stages.get_mut(stage.0) {
            Some(draft) => draft.counter.advance(),
            None => {
                self.unknown_handles.push(stage);
                0
            }
        }
    }

    /// Returns a copy of the stage's run-order counter.
    #[must_use]
    pub fn run_order_counter(&self, stage: StageHandle) -> Option<RunOrderCounter> {
        self.stages.get(stage.0).map(|draft| draft.counter)
    }

    /// Returns a lazy reference to an output of the stage.
    ///
    /// The value is looked up only when the consuming action is about to run.
    /// A handle from another builder is recorded and rejected by
    /// [`build`](Self::build).
    pub fn resolve_output(&mut self, stage: StageHandle, key: impl Into<String>) -> OutputRef {
        let stage_name = match self.stages.get(stage.0) {
            Some(draft) => draft.name.clone(),
            None => {
                self.unknown_handles.push(stage);
                String::new()
            }
        };
        OutputRef::new(stage_name, key)
    }

    /// Adds an action to the stage.
    pub fn add_action(&mut self, stage: StageHandle, spec: ActionSpec) -> &mut Self {
        match self.stages.get_mut(stage.0) {
            Some(draft) => {
                draft.counter.observe(spec.run_order);
                draft.actions.push(spec);
            }
            None => self.unknown_handles.push(stage),
        }
        self
    }

    /// Adds the `Source` stage, holding one `Checkout` action.
    pub fn add_source_stage(&mut self, trigger: Arc<SourceTrigger>) -> StageHandle {
        let stage = self.add_stage(SOURCE_STAGE);
        let run_order = self.next_run_order(stage);
        let action = SourceAction::new(trigger);
        let spec = ActionSpec::new("Checkout", Arc::new(action.clone()))
            .with_run_order(run_order)
            .producing(action.artifact_name())
            .with_output_key(SourceAction::COMMIT_ID)
            .with_output_key(SourceAction::BRANCH_NAME);
        self.add_action(stage, spec);
        stage
    }

    /// Adds the `Build` stage, holding one `Synth` action.
    pub fn add_build_stage(&mut self, build: BuildAction) -> StageHandle {
        let stage = self.add_stage(BUILD_STAGE);
        let run_order = self.next_run_order(stage);
        let spec = ActionSpec::new("Synth", Arc::new(build.clone()))
            .with_run_order(run_order)
            .with_input(build.source_artifact())
            .producing(build.artifact_name());
        self.add_action(stage, spec);
        stage
    }

    /// Adds a deployment stage with one `{stack}.Deploy` action per stack.
    ///
    /// All deploy actions share the stage's next run-order and may run
    /// concurrently.
    pub fn add_application_stage(
        &mut self,
        name: impl Into<String>,
        assembly: &str,
        stacks: &[StackConfig],
        deployer: &Arc<dyn Deployer>,
    ) -> StageHandle {
        let stage = self.add_stage(name);
        self.add_stacks(stage, assembly, stacks, deployer);
        stage
    }

    /// Adds one `{stack}.Deploy` action per stack at the stage's next run-order.
    ///
    /// Returns the run-order the deploy actions share.
    pub fn add_stacks(
        &mut self,
        stage: StageHandle,
        assembly: &str,
        stacks: &[StackConfig],
        deployer: &Arc<dyn Deployer>,
    ) -> u32 {
        let run_order = self.next_run_order(stage);
        for stack in stacks {
            let action = DeployAction::new(&stack.name, assembly, Arc::clone(deployer));
            let spec = stack.outputs.iter().fold(
                ActionSpec::new(format!("{}.Deploy", stack.name), Arc::new(action))
                    .with_run_order(run_order)
                    .with_input(assembly),
                |spec, key| spec.with_output_key(key),
            );
            self.add_action(stage, spec);
        }
        run_order
    }

    /// Validates the definition and freezes it into a [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineValidationError`] carrying one of the
    /// `CONTRACT-DF-*` codes for the first problem found.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if let Some(handle) = self.unknown_handles.first() {
            return Err(contract_error(
                "CONTRACT-DF-RUN_ORDER",
                format!("Stage handle {handle:?} does not belong to pipeline '{}'", self.name),
                Vec::new(),
            ));
        }
        if self.stages.is_empty() {
            return Err(contract_error(
                "CONTRACT-DF-EMPTY",
                format!("Pipeline '{}' has no stages", self.name),
                Vec::new(),
            ));
        }
        check_name("Pipeline", &self.name, Vec::new())?;

        let mut stage_names = HashSet::new();
        for draft in &self.stages {
            check_name("Stage", &draft.name, vec![draft.name.clone()])?;
            if !stage_names.insert(draft.name.as_str()) {
                return Err(contract_error(
                    "CONTRACT-DF-DUPLICATE",
                    format!("Stage '{}' is defined twice", draft.name),
                    vec![draft.name.clone()],
                ));
            }
            if draft.actions.is_empty() {
                return Err(contract_error(
                    "CONTRACT-DF-EMPTY",
                    format!("Stage '{}' has no actions", draft.name),
                    vec![draft.name.clone()],
                ));
            }

            let mut action_names = HashSet::new();
            for action in &draft.actions {
                check_name("Action", &action.name, vec![draft.name.clone()])?;
                if !action_names.insert(action.name.as_str()) {
                    return Err(contract_error(
                        "CONTRACT-DF-DUPLICATE",
                        format!("Action '{}' is defined twice in stage '{}'", action.name, draft.name),
                        vec![draft.name.clone()],
                    ));
                }
                for artifact in action.inputs.iter().chain(&action.produces) {
                    check_artifact_name(artifact, &draft.name, &action.name)?;
                }
                if action.run_order == 0 {
                    return Err(contract_error(
                        "CONTRACT-DF-RUN_ORDER",
                        format!("Action '{}/{}' has run-order 0", draft.name, action.name),
                        vec![draft.name.clone()],
                    ));
                }
            }
        }

        let stages: Vec<StageDefinition> = self
            .stages
            .into_iter()
            .map(|draft| {
                let mut actions = draft.actions;
                actions.sort_by_key(|a| a.run_order);
                StageDefinition {
                    name: draft.name,
                    actions,
                }
            })
            .collect();

        check_data_flow(&stages)?;
        Ok(Pipeline::new(self.name, stages))
    }
}

/// Walks the stages in execution order, checking that every input and output
/// binding is available before it is read and that nothing is produced twice.
fn check_data_flow(stages: &[StageDefinition]) -> Result<(), PipelineValidationError> {
    let mut artifacts: HashSet<&str> = HashSet::new();
    let mut outputs: HashSet<(&str, &str)> = HashSet::new();

    for stage in stages {
        for (_, group) in stage.run_order_groups() {
            for action in &group {
                let consumer = format!("{}/{}", stage.name, action.name);
                for input in &action.inputs {
                    if !artifacts.contains(input.as_str()) {
                        return Err(contract_error(
                            "CONTRACT-DF-MISSING_ARTIFACT",
                            format!("{consumer} reads artifact '{input}' before any action produces it"),
                            vec![stage.name.clone()],
                        ));
                    }
                }
                for (env, reference) in &action.use_outputs {
                    if !outputs.contains(&(reference.stage.as_str(), reference.key.as_str())) {
                        return Err(contract_error(
                            "CONTRACT-DF-FORWARD_REF",
                            format!(
                                "{consumer} binds {env} to output '{reference}' which is not produced before it runs"
                            ),
                            vec![stage.name.clone(), reference.stage.clone()],
                        ));
                    }
                }
            }

            for action in &group {
                for name in &action.produces {
                    if !artifacts.insert(name.as_str()) {
                        return Err(contract_error(
                            "CONTRACT-DF-DUPLICATE",
                            format!("Artifact '{name}' is produced more than once"),
                            vec![stage.name.clone()],
                        ));
                    }
                }
                for key in &action.outputs {
                    if !outputs.insert((stage.name.as_str(), key.as_str())) {
                        return Err(contract_error(
                            "CONTRACT-DF-DUPLICATE",
                            format!("Output '{}.{key}' is produced more than once", stage.name),
                            vec![stage.name.clone()],
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_name(what: &str, name: &str, stages: Vec<String>) -> Result<(), PipelineValidationError> {
    if NAME_PATTERN.is_match(name) {
        return Ok(());
    }
    Err(contract_error(
        "CONTRACT-DF-NAME",
        format!("{what} name '{name}' is invalid"),
        stages,
    ))
}

/// Artifact names become directory names inside action workspaces.
fn check_artifact_name(name: &str, stage: &str, action: &str) -> Result<(), PipelineValidationError> {
    if NAME_PATTERN.is_match(name) && name.chars().any(|c| c != '.') {
        return Ok(());
    }
    Err(contract_error(
        "CONTRACT-DF-NAME",
        format!("Artifact name '{name}' used by {stage}/{action} is invalid"),
        vec![stage.to_string()],
    ))
}

fn contract_error(code: &str, message: String, stages: Vec<String>) -> PipelineValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone());
    if let Some(hint) = ContractSuggestions::get(code) {
        info = info.with_fix_hint(hint);
    }
    PipelineValidationError::new(message)
        .with_stages(stages)
        .with_error_info(info)
}
