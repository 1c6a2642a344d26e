//! The version-control collaborator.

use crate::core::ArtifactBundle;
use crate::errors::DeployflowError;
use crate::secrets::SecretValue;
use async_trait::async_trait;
use std::fmt::Debug;

/// Access to a version-control system.
///
/// Implementations own the provider protocol (API calls, auth headers,
/// archive formats); deployflow only sees commits and file bundles.
#[async_trait]
pub trait SourceProvider: Send + Sync + Debug {
    /// Returns the commit currently at the head of `branch`.
    async fn head(
        &self,
        repository: &str,
        branch: &str,
        token: &SecretValue,
    ) -> Result<String, DeployflowError>;

    /// Returns the tree of `commit` as a bundle.
    async fn checkout(
        &self,
        repository: &str,
        commit: &str,
        token: &SecretValue,
    ) -> Result<ArtifactBundle, DeployflowError>;
}
