//! In-memory credential cache
//!
//! Current value of every logical credential, keyed by secret name.
//! Adapters read it on each call, so a rotation takes effect on the next
//! remote call without reconnecting.

use crate::domain::errors::AdapterError;
use crate::domain::ports::SecretStore;
use crate::domain::value_objects::Credential;
use dashmap::DashMap;

#[derive(Default)]
pub struct CredentialCache {
    credentials: DashMap<String, Credential>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, secret: &str) -> Option<Credential> {
        self.credentials.get(secret).map(|c| c.value().clone())
    }

    /// Store `credential` and return the value it replaced.
    pub fn set(&self, secret: impl Into<String>, credential: Credential) -> Option<Credential> {
        self.credentials.insert(secret.into(), credential)
    }

    /// Load the listed secrets from the store. Missing secrets are skipped.
    pub async fn load_from(
        &self,
        store: &dyn SecretStore,
        secrets: &[String],
    ) -> Result<usize, AdapterError> {
        let mut loaded = 0;
        for name in secrets {
            if let Some(value) = store.get(name).await? {
                self.set(name.clone(), Credential::from_secret(&value));
                loaded += 1;
            } else {
                tracing::warn!("secret {} not found in the store", name);
            }
        }
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::MemorySecretStore;

    #[tokio::test]
    async fn test_load_from_store() {
        let store = MemorySecretStore::new();
        store.insert("db-servers-credential", "app:pw1");

        let cache = CredentialCache::new();
        let loaded = cache
            .load_from(
                &store,
                &["db-servers-credential".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(
            cache.get("db-servers-credential"),
            Some(Credential::new("app", "pw1"))
        );
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_set_returns_previous() {
        let cache = CredentialCache::new();
        assert!(cache.set("a", Credential::new("u", "1")).is_none());
        let previous = cache.set("a", Credential::new("u", "2"));
        assert_eq!(previous.unwrap().password, "1");
        assert_eq!(cache.len(), 1);
    }
}
