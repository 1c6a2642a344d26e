//! Content-addressed artifact storage.
//!
//! Stores are append-only from the orchestrator's point of view: a bundle is
//! keyed by its digest, so publishing identical content twice is a no-op and
//! published content is never modified in place.

mod local;
mod memory;

pub use local::LocalArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::core::{Artifact, ArtifactBundle};
use crate::errors::DeployflowError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Storage for artifact bundles handed from one stage to another.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    /// Publishes a bundle under a logical artifact name.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be persisted.
    async fn put(
        &self,
        name: &str,
        produced_by: &str,
        bundle: ArtifactBundle,
    ) -> Result<Artifact, DeployflowError>;

    /// Fetches the bundle behind an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::MissingArtifact`] if the store has no such
    /// content, or an internal error if the stored content does not match the
    /// artifact digest.
    async fn get(&self, artifact: &Artifact) -> Result<ArtifactBundle, DeployflowError>;

    /// Returns true if the store holds the artifact's content.
    async fn contains(&self, artifact: &Artifact) -> bool;
}

pub(crate) fn verify_digest(
    artifact: &Artifact,
    bundle: ArtifactBundle,
) -> Result<ArtifactBundle, DeployflowError> {
    let actual = bundle.digest();
    if actual == artifact.digest {
        Ok(bundle)
    } else {
        Err(DeployflowError::Internal(format!(
            "artifact '{}' is corrupt: expected digest {}, found {}",
            artifact.name, artifact.digest, actual
        )))
    }
}
