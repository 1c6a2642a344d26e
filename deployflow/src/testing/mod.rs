//! Testing utilities for deployflow pipelines.
//!
//! This module provides:
//! - Mock actions (recording, failing, blocking)
//! - Fakes for the external collaborators: source provider, deployer and
//!   command runner

mod fakes;
mod mocks;

pub use fakes::{CommandCall, Deployment, RecordingDeployer, ScriptedCommandRunner, StaticSourceProvider};
pub use mocks::{BlockingAction, ExecutionLog, FailingAction, RecordingAction};
