//! Filesystem-backed artifact store.

use super::{verify_digest, ArtifactStore};
use crate::core::{Artifact, ArtifactBundle};
use crate::errors::DeployflowError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk representation of a bundle.
#[derive(Debug, Serialize, Deserialize)]
struct StoredBundle {
    /// Relative path to base64-encoded contents.
    files: BTreeMap<String, String>,
}

/// Keeps one JSON document per bundle under a root directory.
///
/// Documents are named after the bundle digest and written through a
/// temporary file, so readers never observe a half-written artifact.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DeployflowError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(format!("{digest}.json"))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(
        &self,
        name: &str,
        produced_by: &str,
        bundle: ArtifactBundle,
    ) -> Result<Artifact, DeployflowError> {
        let digest = bundle.digest();
        let path = self.path_for(&digest);
        let artifact = Artifact::new(name, produced_by, path.display().to_string(), &bundle);

        if tokio::fs::try_exists(&path).await? {
            debug!(artifact = %name, location = %artifact.location, "artifact already stored");
            return Ok(artifact);
        }

        let stored = StoredBundle {
            files: bundle
                .files()
                .iter()
                .map(|(path, contents)| (path.clone(), STANDARD.encode(contents)))
                .collect(),
        };
        let json = serde_json::to_vec(&stored)?;

        let staging = self.root.join(format!(".{digest}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(artifact = %name, location = %artifact.location, "artifact stored");
        Ok(artifact)
    }

    async fn get(&self, artifact: &Artifact) -> Result<ArtifactBundle, DeployflowError> {
        let path = self.path_for(&artifact.digest);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeployflowError::missing_artifact(
                    &artifact.name,
                    &artifact.location,
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredBundle = serde_json::from_slice(&raw)?;
        let mut bundle = ArtifactBundle::new();
        for (file, encoded) in stored.files {
            let contents = STANDARD
                .decode(encoded)
                .map_err(|e| DeployflowError::Serialization(format!("{file}: {e}")))?;
            bundle.insert(file, contents);
        }

        verify_digest(artifact, bundle)
    }

    async fn contains(&self, artifact: &Artifact) -> bool {
        tokio::fs::try_exists(self.path_for(&artifact.digest))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path().join("artifacts")).unwrap();
        let bundle = ArtifactBundle::new()
            .with_file("cdk.out/Prod-WebService.template.json", r#"{"Resources":{}}"#)
            .with_file("cdk.out/asset.bin", vec![0u8, 1, 2, 255]);

        let artifact = store.put("cloud_assembly", "Build/Synth", bundle.clone()).await.unwrap();

        assert!(store.contains(&artifact).await);
        assert_eq!(store.get(&artifact).await.unwrap(), bundle);
    }

    #[tokio::test]
    async fn test_reopened_store_sees_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ArtifactBundle::new().with_file("index.ts", "export {}");

        let artifact = LocalArtifactStore::open(dir.path())
            .unwrap()
            .put("source", "Source/Checkout", bundle.clone())
            .await
            .unwrap();

        let reopened = LocalArtifactStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&artifact).await.unwrap(), bundle);
    }

    #[tokio::test]
    async fn test_tampered_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).unwrap();
        let artifact = store
            .put("source", "Source/Checkout", ArtifactBundle::new().with_file("a", "1"))
            .await
            .unwrap();

        let tampered = StoredBundle {
            files: [("a".to_string(), STANDARD.encode("2"))].into_iter().collect(),
        };
        std::fs::write(
            store.path_for(&artifact.digest),
            serde_json::to_vec(&tampered).unwrap(),
        )
        .unwrap();

        let err = store.get(&artifact).await.unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }

    #[tokio::test]
    async fn test_missing_file_is_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).unwrap();
        let artifact = store
            .put("source", "Source/Checkout", ArtifactBundle::new().with_file("a", "1"))
            .await
            .unwrap();
        std::fs::remove_file(store.path_for(&artifact.digest)).unwrap();

        assert!(!store.contains(&artifact).await);
        let err = store.get(&artifact).await.unwrap_err();
        assert_eq!(err.kind(), "MissingArtifact");
    }
}
