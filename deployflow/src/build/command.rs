//! Command execution.

use crate::errors::DeployflowError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::process::Stdio;
use tracing::debug;

/// The outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutcome {
    /// Creates an outcome with the given exit code and no output.
    #[must_use]
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// Returns true if the command exited with code zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command string inside a working directory.
///
/// A non-zero exit is reported through [`CommandOutcome`], not as an error;
/// errors mean the command could not be run at all.
#[async_trait]
pub trait CommandRunner: Send + Sync + Debug {
    /// Runs `command` in `workdir` with the extra environment `env`.
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutcome, DeployflowError>;
}

/// Runs commands through a POSIX shell (`sh -c`).
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellCommandRunner {
    /// Creates a runner using the given shell binary.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutcome, DeployflowError> {
        debug!(command = %command, workdir = %workdir.display(), "running command");

        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .envs(env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
