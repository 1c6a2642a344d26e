//! The standard install/build/synth command sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commands and output location of the synthesis step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthConfig {
    /// Installs dependencies.
    #[serde(default = "default_install_command")]
    pub install_command: String,
    /// Optional compile/test command run between install and synth.
    #[serde(default)]
    pub build_command: Option<String>,
    /// Produces the deployable definitions.
    #[serde(default = "default_synth_command")]
    pub synth_command: String,
    /// Directory (relative to the workspace) collected as the build artifact.
    /// `None` collects the whole workspace.
    #[serde(default = "default_output_dir")]
    pub output_dir: Option<String>,
    /// Pinned toolkit version, exported as `CDK_CLI_VERSION`.
    #[serde(default)]
    pub cli_version: Option<String>,
    /// Logical name of the produced artifact.
    #[serde(default = "default_artifact")]
    pub artifact: String,
}

fn default_install_command() -> String {
    "npm ci".to_string()
}

fn default_synth_command() -> String {
    "npx cdk synth".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_output_dir() -> Option<String> {
    Some("cdk.out".to_string())
}

fn default_artifact() -> String {
    "cloud_assembly".to_string()
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            install_command: default_install_command(),
            build_command: None,
            synth_command: default_synth_command(),
            output_dir: default_output_dir(),
            cli_version: None,
            artifact: default_artifact(),
        }
    }
}

impl SynthConfig {
    /// Creates the default npm configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the build command.
    #[must_use]
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = Some(command.into());
        self
    }

    /// Sets the toolkit version.
    #[must_use]
    pub fn with_cli_version(mut self, version: impl Into<String>) -> Self {
        self.cli_version = Some(version.into());
        self
    }

    /// Returns the command sequence: install, build (if any), synth.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        let mut commands = vec![self.install_command.clone()];
        commands.extend(self.build_command.clone());
        commands.push(self.synth_command.clone());
        commands
    }

    /// Returns the environment exported to every synth command.
    #[must_use]
    pub fn env(&self) -> BTreeMap<String, String> {
        self.cli_version
            .iter()
            .map(|v| ("CDK_CLI_VERSION".to_string(), v.clone()))
            .collect()
    }
}
