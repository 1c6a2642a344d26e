//! # Deployflow
//!
//! A multi-stage continuous-delivery pipeline orchestrator.
//!
//! A pipeline takes a commit from a source repository, builds it into a
//! deployable artifact, and promotes that artifact through a sequence of
//! deployment stages:
//!
//! - **Source and build**: a [`SourceTrigger`](source::SourceTrigger) snapshots
//!   the commit and a [`BuildRunner`](build::BuildRunner) turns it into a cloud
//!   assembly
//! - **Stages and run orders**: actions inside a stage run in run-order groups;
//!   a group starts only after the previous one has finished
//! - **Output passing**: deploy outputs such as service URLs flow into later
//!   actions as environment variables
//! - **Forward-only failure and cancellation**: a failed or cancelled run never
//!   starts another stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let mut builder = PipelineBuilder::new("webservice");
//! builder.add_source_stage(trigger);
//! builder.add_build_stage(build);
//! builder.add_application_stage("Pre-Prod", "cloud_assembly", &stacks, &deployer);
//! let pipeline = builder.build()?;
//!
//! let report = StageSequencer::new(pipeline, store).run(event, secrets).await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod artifacts;
pub mod build;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod secrets;
pub mod source;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{
        Action, ActionContext, ActionExecutor, ApprovalService, BuildAction, DeployAction,
        Deployer, ManualApprovalAction, ShellScriptAction, SourceAction,
    };
    pub use crate::artifacts::{ArtifactStore, InMemoryArtifactStore, LocalArtifactStore};
    pub use crate::build::{BuildRunner, CommandRunner, ShellCommandRunner, SynthConfig};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{Collaborators, PipelineConfig, StackConfig, StageConfig};
    pub use crate::core::{
        ActionKind, ActionResult, ActionStatus, Artifact, ArtifactBundle, PipelineEvent,
        RunStatus, StageStatus,
    };
    pub use crate::errors::{
        ContractErrorInfo, DeployflowError, OutputConflictError, PipelineValidationError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        ActionSpec, OutputRef, Pipeline, PipelineBuilder, PipelineRun, RunHandle, RunReport,
        StageHandle, StageSequencer,
    };
    pub use crate::secrets::{EnvSecretResolver, SecretResolver, StaticSecretResolver};
    pub use crate::source::{SourceConfig, SourceProvider, SourceTrigger, TriggerEvent};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
