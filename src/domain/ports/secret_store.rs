//! Secret Store Port

use crate::domain::errors::AdapterError;
use async_trait::async_trait;

/// Keyed secret storage. Values are opaque strings (`user:password` for
/// database credentials).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret. `Ok(None)` when the name does not exist.
    async fn get(&self, name: &str) -> Result<Option<String>, AdapterError>;

    /// Write a secret, creating it when missing.
    async fn set(&self, name: &str, value: &str) -> Result<(), AdapterError>;

    /// Replace a secret and return its previous value.
    ///
    /// The default reads then writes; stores with a native check-and-set
    /// should override it.
    async fn rotate(&self, name: &str, new_value: &str) -> Result<Option<String>, AdapterError> {
        let previous = self.get(name).await?;
        self.set(name, new_value).await?;
        Ok(previous)
    }
}
