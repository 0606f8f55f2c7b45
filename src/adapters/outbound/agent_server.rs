//! Agent Server Adapter
//!
//! Implements ServerAdapter against a small management agent running next
//! to each database (JSON over HTTP). Requests authenticate with the
//! server's credential as held in the credential cache, so a rotated value
//! is used from the next call on.

use crate::application::credentials::CredentialCache;
use crate::domain::entities::ServerStatus;
use crate::domain::errors::AdapterError;
use crate::domain::ports::ServerAdapter;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct CredentialBody<'a> {
    user: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RestartFlagBody {
    required: bool,
}

#[derive(Debug, Serialize)]
struct SqlBody<'a> {
    statement: &'a str,
}

pub struct AgentServerAdapter {
    base_url: String,
    /// Secret name of the credential used to authenticate
    credential: String,
    cache: Arc<CredentialCache>,
    client: reqwest::Client,
}

impl AgentServerAdapter {
    pub fn new(
        base_url: impl Into<String>,
        credential: impl Into<String>,
        cache: Arc<CredentialCache>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: credential.into(),
            cache,
            client,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.cache.get(&self.credential) {
            Some(credential) => builder.basic_auth(credential.user, Some(credential.password)),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, AdapterError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                AdapterError::Connection(e.to_string())
            } else {
                AdapterError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(AdapterError::Rejected(format!("{} - {}", status, body)))
        } else {
            Err(AdapterError::Http(format!("{} - {}", status, body)))
        }
    }
}

#[async_trait]
impl ServerAdapter for AgentServerAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.send(self.request(reqwest::Method::GET, "/api/v1/ping"))
            .await
            .map(|_| ())
    }

    async fn refresh_status(&self) -> Result<ServerStatus, AdapterError> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/api/v1/status"))
            .await?;
        response
            .json::<ServerStatus>()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))
    }

    async fn set_credential(&self, user: &str, password: &str) -> Result<(), AdapterError> {
        let body = CredentialBody { user, password };
        self.send(
            self.request(reqwest::Method::POST, "/api/v1/credentials")
                .json(&body),
        )
        .await
        .map(|_| ())
    }

    async fn set_restart_flag(&self, required: bool) -> Result<(), AdapterError> {
        self.send(
            self.request(reqwest::Method::POST, "/api/v1/restart-flag")
                .json(&RestartFlagBody { required }),
        )
        .await
        .map(|_| ())
    }

    async fn run_sql(&self, statement: &str) -> Result<(), AdapterError> {
        self.send(
            self.request(reqwest::Method::POST, "/api/v1/sql")
                .json(&SqlBody { statement }),
        )
        .await
        .map(|_| ())
    }
}
