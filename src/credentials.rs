//! Credential store port. Storage primitives (a real vault) are an
//! out-of-scope external collaborator; this ships the in-process adapter
//! the rest of the runtime and its tests run against.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store is unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, name: &str, key: &str) -> Result<Option<String>, CredentialError>;
    async fn set(&self, name: &str, key: &str, value: &str) -> Result<(), CredentialError>;
}

/// In-memory credential store. Suitable for tests and single-process
/// deployments; production vault-backed adapters implement the same trait.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, name: &str, key: &str) -> Result<Option<String>, CredentialError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CredentialError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.get(&(name.to_string(), key.to_string())).cloned())
    }

    async fn set(&self, name: &str, key: &str, value: &str) -> Result<(), CredentialError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CredentialError::Unavailable("lock poisoned".to_string()))?;
        entries.insert((name.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(store.get("oauth", "google-1").await.unwrap(), None);
        store.set("oauth", "google-1", "{}").await.unwrap();
        assert_eq!(store.get("oauth", "google-1").await.unwrap(), Some("{}".to_string()));
    }
}
