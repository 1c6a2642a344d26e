//! In-memory artifact store.

use super::{verify_digest, ArtifactStore};
use crate::core::{Artifact, ArtifactBundle};
use crate::errors::DeployflowError;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Keeps bundles in a concurrent map keyed by digest.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    entries: DashMap<String, ArtifactBundle>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct bundles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        name: &str,
        produced_by: &str,
        bundle: ArtifactBundle,
    ) -> Result<Artifact, DeployflowError> {
        let digest = bundle.digest();
        let artifact = Artifact::new(name, produced_by, format!("memory://sha256/{digest}"), &bundle);
        self.entries.entry(digest).or_insert(bundle);
        debug!(artifact = %name, location = %artifact.location, "artifact stored");
        Ok(artifact)
    }

    async fn get(&self, artifact: &Artifact) -> Result<ArtifactBundle, DeployflowError> {
        let bundle = self
            .entries
            .get(&artifact.digest)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                DeployflowError::missing_artifact(&artifact.name, &artifact.location)
            })?;
        verify_digest(artifact, bundle)
    }

    async fn contains(&self, artifact: &Artifact) -> bool {
        self.entries.contains_key(&artifact.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_put_get() {
        let store = InMemoryArtifactStore::new();
        let bundle = ArtifactBundle::new().with_file("cdk.out/manifest.json", "{}");

        let artifact = store.put("cloud_assembly", "Build/Synth", bundle.clone()).await.unwrap();
        assert!(artifact.location.starts_with("memory://sha256/"));
        assert!(store.contains(&artifact).await);
        assert_eq!(store.get(&artifact).await.unwrap(), bundle);
    }

    #[tokio::test]
    async fn test_identical_content_is_stored_once() {
        let store = InMemoryArtifactStore::new();
        let bundle = ArtifactBundle::new().with_file("a", "1");

        let first = store.put("source", "Source/Checkout", bundle.clone()).await.unwrap();
        let second = store.put("source", "Source/Checkout", bundle).await.unwrap();

        assert_eq!(first.location, second.location);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_artifact_is_missing() {
        let store = InMemoryArtifactStore::new();
        let other = InMemoryArtifactStore::new();
        let artifact = other
            .put("source", "Source/Checkout", ArtifactBundle::new().with_file("a", "1"))
            .await
            .unwrap();

        assert!(!store.contains(&artifact).await);
        let err = store.get(&artifact).await.unwrap_err();
        assert!(matches!(err, DeployflowError::MissingArtifact { ref artifact, .. } if artifact == "source"));
    }
}
