//! Source-control triggers.
//!
//! A [`SourceTrigger`] turns a webhook payload or a poll result into a
//! [`TriggerEvent`], then materializes that commit into the run's source
//! artifact through an external [`SourceProvider`].

mod event;
mod provider;
mod trigger;

pub use event::TriggerEvent;
pub use provider::SourceProvider;
pub use trigger::{SourceConfig, SourceTrigger};
