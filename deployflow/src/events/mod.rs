//! Event sink system for run observability.
//!
//! The sequencer emits a [`PipelineEvent`](crate::core::PipelineEvent) at every
//! lifecycle transition; sinks decide what to do with them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
