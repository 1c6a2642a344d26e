//! In-memory fakes for the external collaborators.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::actions::Deployer;
use crate::build::{CommandOutcome, CommandRunner};
use crate::core::ArtifactBundle;
use crate::errors::DeployflowError;
use crate::secrets::SecretValue;
use crate::source::SourceProvider;

/// A source provider serving fixed snapshots.
#[derive(Debug, Default)]
pub struct StaticSourceProvider {
    token: Option<String>,
    snapshots: HashMap<String, ArtifactBundle>,
    heads: RwLock<HashMap<(String, String), String>>,
    checkouts: Mutex<Vec<String>>,
}

impl StaticSourceProvider {
    /// Creates a provider accepting any token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires this exact token on every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Serves `bundle` as the tree of `commit`.
    #[must_use]
    pub fn with_snapshot(mut self, commit: impl Into<String>, bundle: ArtifactBundle) -> Self {
        self.snapshots.insert(commit.into(), bundle);
        self
    }

    /// Moves the head of a branch.
    pub fn set_head(&self, repository: &str, branch: &str, commit: &str) {
        self.heads
            .write()
            .insert((repository.to_string(), branch.to_string()), commit.to_string());
    }

    /// Returns the commits checked out so far.
    #[must_use]
    pub fn checkouts(&self) -> Vec<String> {
        self.checkouts.lock().clone()
    }

    fn authorize(&self, repository: &str, token: &SecretValue) -> Result<(), DeployflowError> {
        match &self.token {
            Some(expected) if expected != token.expose() => Err(DeployflowError::Source(format!(
                "authentication to {repository} failed"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SourceProvider for StaticSourceProvider {
    async fn head(
        &self,
        repository: &str,
        branch: &str,
        token: &SecretValue,
    ) -> Result<String, DeployflowError> {
        self.authorize(repository, token)?;
        self.heads
            .read()
            .get(&(repository.to_string(), branch.to_string()))
            .cloned()
            .ok_or_else(|| DeployflowError::Source(format!("unknown branch {repository}@{branch}")))
    }

    async fn checkout(
        &self,
        repository: &str,
        commit: &str,
        token: &SecretValue,
    ) -> Result<ArtifactBundle, DeployflowError> {
        self.authorize(repository, token)?;
        let bundle = self
            .snapshots
            .get(commit)
            .cloned()
            .ok_or_else(|| DeployflowError::Source(format!("unknown commit {commit} in {repository}")))?;
        self.checkouts.lock().push(commit.to_string());
        Ok(bundle)
    }
}

/// One call to a [`RecordingDeployer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// The deployed stack.
    pub stack: String,
    /// The target environment (the stage name).
    pub environment: String,
    /// Number of files in the assembly.
    pub files: usize,
}

/// A deployer returning fixed outputs per stack.
#[derive(Debug, Default)]
pub struct RecordingDeployer {
    outputs: HashMap<String, BTreeMap<String, String>>,
    failing: HashSet<String>,
    deployments: Mutex<Vec<Deployment>>,
}

impl RecordingDeployer {
    /// Creates a deployer with no outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output returned whenever `stack` is deployed.
    #[must_use]
    pub fn with_output(
        mut self,
        stack: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.outputs
            .entry(stack.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Fails every deployment into `environment`.
    #[must_use]
    pub fn failing_in(mut self, environment: impl Into<String>) -> Self {
        self.failing.insert(environment.into());
        self
    }

    /// Returns every deployment made so far.
    #[must_use]
    pub fn deployments(&self) -> Vec<Deployment> {
        self.deployments.lock().clone()
    }

    /// Returns the environments deployed to, in call order.
    #[must_use]
    pub fn environments(&self) -> Vec<String> {
        self.deployments
            .lock()
            .iter()
            .map(|d| d.environment.clone())
            .collect()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(
        &self,
        stack: &str,
        environment: &str,
        assembly: &ArtifactBundle,
    ) -> Result<BTreeMap<String, String>, DeployflowError> {
        self.deployments.lock().push(Deployment {
            stack: stack.to_string(),
            environment: environment.to_string(),
            files: assembly.len(),
        });
        if self.failing.contains(environment) {
            return Err(DeployflowError::Internal(format!(
                "stack {stack} failed to deploy to {environment}"
            )));
        }
        Ok(self.outputs.get(stack).cloned().unwrap_or_default())
    }
}

/// One call to a [`ScriptedCommandRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    /// The command string.
    pub command: String,
    /// The extra environment passed to the command.
    pub env: BTreeMap<String, String>,
    /// Files present in the working directory before the command ran, sorted.
    pub files: Vec<String>,
}

/// A command runner that follows a script instead of spawning processes.
///
/// Commands exit zero unless configured otherwise; successful commands may
/// write files into the working directory.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    exit_codes: HashMap<String, i32>,
    writes: HashMap<String, Vec<(String, String)>>,
    calls: Mutex<Vec<CommandCall>>,
}

impl ScriptedCommandRunner {
    /// Creates a runner where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `command` exit with `code`.
    #[must_use]
    pub fn exits_with(mut self, command: impl Into<String>, code: i32) -> Self {
        self.exit_codes.insert(command.into(), code);
        self
    }

    /// Makes `command` write `contents` to `path` (relative to the working directory).
    #[must_use]
    pub fn writes_file(
        mut self,
        command: impl Into<String>,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Self {
        self.writes
            .entry(command.into())
            .or_default()
            .push((path.into(), contents.into()));
        self
    }

    /// Returns the commands run so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutcome, DeployflowError> {
        let files = ArtifactBundle::collect(workdir.to_path_buf())
            .await?
            .paths()
            .map(ToString::to_string)
            .collect();
        self.calls.lock().push(CommandCall {
            command: command.to_string(),
            env: env.clone(),
            files,
        });

        let exit_code = self.exit_codes.get(command).copied().unwrap_or(0);
        if exit_code != 0 {
            return Ok(CommandOutcome {
                exit_code,
                stdout: String::new(),
                stderr: format!("{command}: scripted failure"),
            });
        }

        for (path, contents) in self.writes.get(command).into_iter().flatten() {
            let target = workdir.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(target, contents).await?;
        }
        Ok(CommandOutcome::exited(0))
    }
}
