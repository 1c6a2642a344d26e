//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Action kinds and action/stage/run statuses
//! - Artifacts and their file bundles
//! - Action results and pipeline events

mod artifact;
mod event;
mod result;
mod status;

pub use artifact::{Artifact, ArtifactBundle};
pub use event::PipelineEvent;
pub use result::ActionResult;
pub use status::{ActionKind, ActionStatus, RunStatus, StageStatus};
