//! Build/synthesis of deployable definitions from source.
//!
//! This module provides:
//! - The [`CommandRunner`] seam and a `sh -c` implementation
//! - [`BuildRunner`], which runs a command list against a source artifact
//! - [`SynthConfig`], the standard install/build/synth command sequence

mod command;
mod runner;
mod synth;

pub use command::{CommandOutcome, CommandRunner, ShellCommandRunner};
pub use runner::BuildRunner;
pub use synth::SynthConfig;
