// ABOUTME: Secret store abstraction for credentials needed by the generation service
// ABOUTME: Environment-backed and in-memory implementations

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),
}

/// Source of named secrets such as API keys
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<String, SecretError>;
}

/// Reads secrets from process environment variables.
///
/// Blank values are treated as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn lookup(&self, name: &str) -> Result<String, SecretError> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

/// Fixed in-memory secrets, for embedding and tests
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn lookup(&self, name: &str) -> Result<String, SecretError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_store_lookup() {
        let store = StaticSecretStore::new().with_secret("ANTHROPIC_API_KEY", "sk-test");
        assert_eq!(store.lookup("ANTHROPIC_API_KEY").await.unwrap(), "sk-test");
        assert_eq!(
            store.lookup("OTHER").await.unwrap_err(),
            SecretError::NotFound("OTHER".to_string())
        );
    }

    #[tokio::test]
    async fn test_env_store_blank_is_missing() {
        std::env::set_var("SHIPYARD_TEST_BLANK_SECRET", "  ");
        assert!(EnvSecretStore
            .lookup("SHIPYARD_TEST_BLANK_SECRET")
            .await
            .is_err());
        std::env::remove_var("SHIPYARD_TEST_BLANK_SECRET");
    }
}
