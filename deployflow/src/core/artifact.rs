//! Artifacts and the file bundles they carry between stages.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::errors::DeployflowError;
use crate::utils::run_blocking;

/// An immutable reference to a bundle of files produced by one action.
///
/// The files themselves live in an [`ArtifactStore`](crate::artifacts::ArtifactStore);
/// the artifact records where and what they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The logical artifact name (e.g. "source", "cloud_assembly").
    pub name: String,
    /// The producing action, as `stage/action`.
    pub produced_by: String,
    /// Where the store keeps the contents.
    pub location: String,
    /// SHA-256 digest of the bundle, hex encoded.
    pub digest: String,
    /// Number of files in the bundle.
    pub file_count: usize,
    /// When the artifact was created (ISO 8601).
    pub created_at: String,
}

impl Artifact {
    /// Creates a new artifact record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        produced_by: impl Into<String>,
        location: impl Into<String>,
        bundle: &ArtifactBundle,
    ) -> Self {
        Self {
            name: name.into(),
            produced_by: produced_by.into(),
            location: location.into(),
            digest: bundle.digest(),
            file_count: bundle.len(),
            created_at: crate::utils::iso_timestamp(),
        }
    }
}

/// The files of an artifact, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactBundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl ArtifactBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, builder style.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Adds or replaces a file.
    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(normalize(&path.into()), contents.into());
    }

    /// Returns the contents of a file.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Returns the file paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Returns all files in path order.
    #[must_use]
    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    /// Returns the number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the bundle holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Computes the content digest over paths and contents.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, contents) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(contents);
        }
        hex::encode(hasher.finalize())
    }

    /// Writes every file below `root`, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Fails on IO errors or when a path would escape `root`.
    pub fn write_to(&self, root: &Path) -> io::Result<()> {
        for (path, contents) in &self.files {
            let relative = Path::new(path);
            if !is_contained(relative) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("artifact path '{path}' escapes the workspace"),
                ));
            }
            let target = root.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }
        Ok(())
    }

    /// Writes every file below `root` without blocking the async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`write_to`](Self::write_to).
    pub async fn unpack(self, root: PathBuf) -> Result<(), DeployflowError> {
        run_blocking(move || self.write_to(&root)).await
    }

    /// Reads a directory into a bundle without blocking the async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`read_from`](Self::read_from).
    pub async fn collect(root: PathBuf) -> Result<Self, DeployflowError> {
        run_blocking(move || Self::read_from(&root)).await
    }

    /// Reads every regular file below `root` into a bundle.
    ///
    /// # Errors
    ///
    /// Fails on IO errors.
    pub fn read_from(root: &Path) -> io::Result<Self> {
        let mut bundle = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let relative = path
                        .strip_prefix(root)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    bundle.files.insert(key, std::fs::read(&path)?);
                }
            }
        }

        Ok(bundle)
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_digest_depends_on_paths_and_contents() {
        let a = ArtifactBundle::new().with_file("a.txt", "hello");
        let b = ArtifactBundle::new().with_file("b.txt", "hello");
        let c = ArtifactBundle::new().with_file("a.txt", "hello!");

        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest(), a.clone().digest());
    }

    #[test]
    fn test_insert_normalizes_paths() {
        let bundle = ArtifactBundle::new().with_file("./cdk.out\\manifest.json", "{}");
        assert_eq!(bundle.paths().collect::<Vec<_>>(), vec!["cdk.out/manifest.json"]);
    }

    #[test]
    fn test_write_and_read_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ArtifactBundle::new()
            .with_file("package.json", "{}")
            .with_file("lib/stack.ts", "export {}")
            .with_file("cdk.out/Prod/template.json", vec![0u8, 159, 146, 150]);

        bundle.write_to(dir.path()).unwrap();
        let read = ArtifactBundle::read_from(dir.path()).unwrap();

        assert_eq!(read, bundle);
    }

    #[tokio::test]
    async fn test_unpack_and_collect_off_runtime() {
        let dir = crate::utils::scratch_dir().await.unwrap();
        let bundle = ArtifactBundle::new()
            .with_file("cdk.out/WebService.template.json", "{}")
            .with_file("package.json", "{}");

        bundle.clone().unpack(dir.path().to_path_buf()).await.unwrap();
        let collected = ArtifactBundle::collect(dir.path().join("cdk.out")).await.unwrap();

        assert_eq!(collected.paths().collect::<Vec<_>>(), vec!["WebService.template.json"]);
        let escaping = ArtifactBundle::new().with_file("../outside.txt", "nope");
        let err = escaping.unpack(dir.path().to_path_buf()).await.unwrap_err();
        assert_eq!(err.kind(), "Io");
    }

    #[test]
    fn test_write_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ArtifactBundle::new().with_file("../outside.txt", "nope");

        let err = bundle.write_to(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_artifact_records_bundle_shape() {
        let bundle = ArtifactBundle::new().with_file("a", "1").with_file("b", "2");
        let artifact = Artifact::new("source", "Source/Checkout", "memory://x", &bundle);

        assert_eq!(artifact.file_count, 2);
        assert_eq!(artifact.digest, bundle.digest());
        assert_eq!(artifact.produced_by, "Source/Checkout");
    }
}
