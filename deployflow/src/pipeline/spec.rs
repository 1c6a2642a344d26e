//! Immutable pipeline, stage and action descriptions.

use crate::actions::Action;
use crate::core::ActionKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A lazy reference to an output value produced by a stage.
///
/// Resolved only when the consuming action is about to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    /// The producing stage.
    pub stage: String,
    /// The output key.
    pub key: String,
}

impl OutputRef {
    /// Creates an output reference.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.key)
    }
}

impl FromStr for OutputRef {
    type Err = PipelineValidationError;

    /// Parses `Stage.KEY`; the key is everything after the last dot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((stage, key)) if !stage.is_empty() && !key.is_empty() => Ok(Self::new(stage, key)),
            _ => Err(PipelineValidationError::new(format!(
                "Output reference '{s}' must have the form 'Stage.KEY'"
            ))
            .with_error_info(ContractErrorInfo::new(
                "CONTRACT-DF-NAME",
                format!("Malformed output reference '{s}'"),
            ))),
        }
    }
}

/// Specification for a single action in a stage.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// The action name, unique within its stage.
    pub name: String,
    /// Run-order within the stage (1-based).
    pub run_order: u32,
    /// The action implementation.
    pub runner: Arc<dyn Action>,
    /// Logical names of the artifacts the action reads.
    pub inputs: Vec<String>,
    /// Logical names of the artifacts the action publishes.
    pub produces: Vec<String>,
    /// Output keys the action promises to produce.
    pub outputs: Vec<String>,
    /// Environment bindings resolved from earlier outputs.
    pub use_outputs: BTreeMap<String, OutputRef>,
}

impl ActionSpec {
    /// Creates a new action specification with run-order 1.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            run_order: 1,
            runner,
            inputs: Vec::new(),
            produces: Vec::new(),
            outputs: Vec::new(),
            use_outputs: BTreeMap::new(),
        }
    }

    /// Sets the run-order.
    #[must_use]
    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    /// Adds an input artifact.
    #[must_use]
    pub fn with_input(mut self, artifact: impl Into<String>) -> Self {
        self.inputs.push(artifact.into());
        self
    }

    /// Declares a published artifact.
    #[must_use]
    pub fn producing(mut self, artifact: impl Into<String>) -> Self {
        self.produces.push(artifact.into());
        self
    }

    /// Declares an output key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }

    /// Binds an earlier output to an environment variable.
    #[must_use]
    pub fn use_output(mut self, env: impl Into<String>, output: OutputRef) -> Self {
        self.use_outputs.insert(env.into(), output);
        self
    }

    /// Returns the kind of the underlying action.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.runner.kind()
    }
}

/// A stage: an ordered group of actions.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// The stage name, unique within the pipeline.
    pub name: String,
    /// Actions, sorted by run-order.
    pub actions: Vec<ActionSpec>,
}

impl StageDefinition {
    /// Returns the actions grouped by run-order, ascending.
    ///
    /// Actions within one group may run concurrently; groups are barriers.
    #[must_use]
    pub fn run_order_groups(&self) -> Vec<(u32, Vec<&ActionSpec>)> {
        let mut groups: BTreeMap<u32, Vec<&ActionSpec>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups.into_iter().collect()
    }

    /// Returns an action by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Returns every output key declared by the stage's actions.
    #[must_use]
    pub fn output_keys(&self) -> HashSet<&str> {
        self.actions
            .iter()
            .flat_map(|a| a.outputs.iter().map(String::as_str))
            .collect()
    }
}

/// A validated, immutable pipeline.
///
/// Only [`PipelineBuilder`](super::PipelineBuilder) creates pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageDefinition>,
}

impl Pipeline {
    pub(crate) fn new(name: String, stages: Vec<StageDefinition>) -> Self {
        Self { name, stages }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the total number of actions.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.stages.iter().map(|s| s.actions.len()).sum()
    }
}
