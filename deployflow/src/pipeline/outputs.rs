//! Run-scoped registry of named outputs.

use super::OutputRef;
use crate::errors::{DeployflowError, OutputConflictError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Output values produced during one run, namespaced by stage.
///
/// Each `(stage, key)` is written at most once. Reads never mutate, so
/// resolving the same reference twice always yields the same value.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    values: RwLock<BTreeMap<OutputRef, String>>,
}

impl OutputRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an output value.
    ///
    /// # Errors
    ///
    /// Returns [`OutputConflictError`] if the key was already produced by the stage.
    pub fn record(
        &self,
        stage: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), OutputConflictError> {
        let mut values = self.values.write();
        let reference = OutputRef::new(stage, key);
        if values.contains_key(&reference) {
            return Err(OutputConflictError::new(stage, key));
        }
        values.insert(reference, value.into());
        Ok(())
    }

    /// Resolves a reference for `consumer` (`stage/action`).
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::ForwardReference`] if the value has not been produced.
    pub fn resolve(&self, reference: &OutputRef, consumer: &str) -> Result<String, DeployflowError> {
        self.values.read().get(reference).cloned().ok_or_else(|| {
            DeployflowError::forward_reference(consumer, &reference.stage, &reference.key)
        })
    }

    /// Resolves every binding of an action into an environment map.
    ///
    /// # Errors
    ///
    /// Returns the first unresolved binding as a forward reference.
    pub fn resolve_bindings(
        &self,
        bindings: &BTreeMap<String, OutputRef>,
        consumer: &str,
    ) -> Result<BTreeMap<String, String>, DeployflowError> {
        bindings
            .iter()
            .map(|(env, reference)| Ok((env.clone(), self.resolve(reference, consumer)?)))
            .collect()
    }

    /// Returns a copy of every value, keyed by `Stage.KEY`.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .read()
            .iter()
            .map(|(reference, value)| (reference.to_string(), value.clone()))
            .collect()
    }

    /// Returns the number of recorded values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}
