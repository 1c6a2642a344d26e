//! Secret lookup by name.
//!
//! Secrets (e.g. the source-control token) are resolved through a
//! [`SecretResolver`] handed to the sequencer when a run starts. Pipeline
//! definitions only ever carry secret *names*.

use crate::errors::DeployflowError;
use async_trait::async_trait;
use std::collections::HashMap;

/// A resolved secret value. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the plain value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Resolves secrets by name at run time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Looks up a secret.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::Secret`] when the secret is unknown or unreadable.
    async fn resolve(&self, name: &str) -> Result<SecretValue, DeployflowError>;
}

/// Serves secrets from a fixed map.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretResolver {
    secrets: HashMap<String, SecretValue>,
}

impl StaticSecretResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), SecretValue::new(value));
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, name: &str) -> Result<SecretValue, DeployflowError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| DeployflowError::Secret {
                name: name.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Reads secrets from environment variables.
///
/// A secret named `github-token` is read from `DEPLOYFLOW_SECRET_GITHUB_TOKEN`
/// with the default prefix.
#[derive(Debug, Clone)]
pub struct EnvSecretResolver {
    prefix: String,
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new("DEPLOYFLOW_SECRET_")
    }
}

impl EnvSecretResolver {
    /// Creates a resolver with the given variable prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the environment variable consulted for a secret name.
    #[must_use]
    pub fn variable_name(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, name: &str) -> Result<SecretValue, DeployflowError> {
        let variable = self.variable_name(name);
        std::env::var(&variable)
            .map(SecretValue::new)
            .map_err(|e| DeployflowError::Secret {
                name: name.to_string(),
                reason: format!("{variable}: {e}"),
            })
    }
}
