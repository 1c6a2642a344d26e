//! Pipeline definition and execution.
//!
//! This module provides:
//! - Immutable pipeline, stage and action specifications
//! - The builder that validates a definition into a [`Pipeline`]
//! - Per-stage run-order counters and the run-scoped output registry
//! - The [`StageSequencer`] that executes runs and the records it produces

mod builder;
mod outputs;
mod run;
mod run_order;
mod sequencer;
mod spec;


pub use builder::{PipelineBuilder, StageHandle, BUILD_STAGE, SOURCE_STAGE};
pub use outputs::OutputRegistry;
pub use run::{ActionRecord, PipelineRun, RunReport, StageRecord};
pub use run_order::RunOrderCounter;
pub use sequencer::{RunHandle, StageSequencer};
pub use spec::{ActionSpec, OutputRef, Pipeline, StageDefinition};
