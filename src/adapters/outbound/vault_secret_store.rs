//! Vault Secret Store
//!
//! Implements SecretStore on a HashiCorp Vault KV version 2 mount. Each
//! secret is stored under `<mount>/data/<name>` with a single `value` key.

use crate::domain::errors::AdapterError;
use crate::domain::ports::SecretStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize, Serialize)]
struct KvData {
    data: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Base URL, e.g. "http://127.0.0.1:8200"
    pub address: String,
    pub token: String,
    pub mount: String,
}

pub struct VaultSecretStore {
    config: VaultConfig,
    client: reqwest::Client,
}

impl VaultSecretStore {
    pub fn new(config: VaultConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn url(&self, name: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.config.address.trim_end_matches('/'),
            self.config.mount.trim_matches('/'),
            name.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>, AdapterError> {
        let response = self
            .client
            .get(self.url(name))
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http(format!("vault read failed: {} - {}", status, body)));
        }

        let body: KvReadResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;
        Ok(body.data.data.get("value").cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), AdapterError> {
        let mut data = HashMap::new();
        data.insert("value".to_string(), value.to_string());

        let response = self
            .client
            .post(self.url(name))
            .header("X-Vault-Token", &self.config.token)
            .json(&KvData { data })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http(format!("vault write failed: {} - {}", status, body)));
        }
        tracing::debug!("vault secret {} written", name);
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(uri: &str) -> VaultSecretStore {
        VaultSecretStore::new(
            VaultConfig {
                address: uri.to_string(),
                token: "s.test".to_string(),
                mount: "secret".to_string(),
            },
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn test_get_secret() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/db-servers-credential"))
            .and(header("X-Vault-Token", "s.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"data": {"value": "app:pw"}, "metadata": {"version": 3}}
            })))
            .mount(&mock_server)
            .await;

        let value = store(&mock_server.uri())
            .get("db-servers-credential")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("app:pw"));
    }

    #[tokio::test]
    async fn test_get_missing_secret() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"errors": []})))
            .mount(&mock_server)
            .await;

        assert_eq!(store(&mock_server.uri()).get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rotate_reads_then_writes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/replication-credential"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"data": {"value": "repl:old"}}
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/data/replication-credential"))
            .and(body_json(serde_json::json!({"data": {"value": "repl:new"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"version": 4}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let previous = store(&mock_server.uri())
            .rotate("replication-credential", "repl:new")
            .await
            .unwrap();
        assert_eq!(previous.as_deref(), Some("repl:old"));
    }

    #[tokio::test]
    async fn test_write_refused() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&mock_server)
            .await;

        let err = store(&mock_server.uri()).set("x", "y").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
