//! HAProxy Runtime Adapter
//!
//! Implements ProxyAdapter over the HAProxy runtime API (stats socket
//! exposed on TCP). One connection per command: HAProxy answers and closes
//! when not in interactive mode.
//!
//! The write backend is expected to hold a single server named `leader`
//! whose address is repointed on failover.

use crate::domain::entities::{BackendEntry, BackendTable};
use crate::domain::errors::AdapterError;
use crate::domain::ports::ProxyAdapter;
use crate::domain::value_objects::{BackendState, CredentialScope};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Column indexes of `show stat` CSV output.
const COL_PXNAME: usize = 0;
const COL_SVNAME: usize = 1;
const COL_STATUS: usize = 17;
const COL_ADDR: usize = 73;

/// Server name of the write backend's only entry.
pub const LEADER_SERVER_NAME: &str = "leader";

#[derive(Debug, Clone)]
pub struct HaproxyRuntimeConfig {
    pub host: String,
    pub port: u16,
    pub read_backend: String,
    pub write_backend: String,
    pub timeout: Duration,
}

pub struct HaproxyRuntimeAdapter {
    config: HaproxyRuntimeConfig,
}

impl HaproxyRuntimeAdapter {
    pub fn new(config: HaproxyRuntimeConfig) -> Self {
        Self { config }
    }

    /// Send one runtime command and return the raw answer.
    async fn command(&self, command: &str) -> Result<String, AdapterError> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let exchange = async {
            let mut stream = TcpStream::connect(&address).await?;
            stream.write_all(command.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.shutdown().await?;

            let mut answer = String::new();
            stream.read_to_string(&mut answer).await?;
            Ok::<_, std::io::Error>(answer)
        };

        let answer = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| AdapterError::Timeout(self.config.timeout))??;

        tracing::debug!("haproxy {} <- {:?}: {} bytes", address, command, answer.len());
        check_answer(&answer)?;
        Ok(answer)
    }

    async fn set_state(&self, server: &str, backend: &str, state: &str) -> Result<(), AdapterError> {
        self.command(&format!("set server {}/{} state {}", backend, server, state))
            .await
            .map(|_| ())
    }
}

/// HAProxy reports refusals as plain text on an otherwise successful
/// exchange.
fn check_answer(answer: &str) -> Result<(), AdapterError> {
    let first = answer.lines().next().unwrap_or_default().trim();
    let refused = ["No such", "Unknown command", "Permission denied", "Require", "Invalid"];
    if refused.iter().any(|p| first.starts_with(p)) {
        return Err(AdapterError::Rejected(first.to_string()));
    }
    Ok(())
}

/// Parse `show stat` CSV into the read and write backend tables.
///
/// Frontend and backend summary rows are skipped; only server rows of the
/// two configured backends are kept.
pub fn parse_show_stat(
    csv: &str,
    read_backend: &str,
    write_backend: &str,
) -> Result<BackendTable, AdapterError> {
    let mut table = BackendTable::default();
    let read_backend = read_backend.to_lowercase();
    let write_backend = write_backend.to_lowercase();

    for line in csv.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() <= COL_ADDR {
            return Err(AdapterError::Protocol(format!(
                "show stat row has {} columns, expected at least {}",
                fields.len(),
                COL_ADDR + 1
            )));
        }

        let svname = fields[COL_SVNAME];
        if svname == "FRONTEND" || svname == "BACKEND" {
            continue;
        }
        let pxname = fields[COL_PXNAME].to_lowercase();
        let entry = BackendEntry::new(
            svname,
            fields[COL_ADDR],
            BackendState::parse(fields[COL_STATUS]),
        );

        if pxname.contains(&write_backend) {
            table.write.push(entry);
        } else if pxname.contains(&read_backend) {
            table.read.push(entry);
        }
    }

    Ok(table)
}

/// Extract the `Version:` line of `show info`.
pub fn parse_version(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
}

#[async_trait]
impl ProxyAdapter for HaproxyRuntimeAdapter {
    async fn read_backend_state(&self) -> Result<BackendTable, AdapterError> {
        let csv = self.command("show stat").await?;
        parse_show_stat(&csv, &self.config.read_backend, &self.config.write_backend)
    }

    async fn set_leader(&self, host: &str, port: u16) -> Result<(), AdapterError> {
        self.command(&format!(
            "set server {}/{} addr {} port {}",
            self.config.write_backend, LEADER_SERVER_NAME, host, port
        ))
        .await?;
        self.set_state(LEADER_SERVER_NAME, &self.config.write_backend, "ready")
            .await
    }

    async fn set_drain(&self, server: &str, backend: &str) -> Result<(), AdapterError> {
        self.set_state(server, backend, "drain").await
    }

    async fn set_ready(&self, server: &str, backend: &str) -> Result<(), AdapterError> {
        self.set_state(server, backend, "ready").await
    }

    async fn set_maintenance(&self, server: &str, backend: &str) -> Result<(), AdapterError> {
        self.set_state(server, backend, "maint").await
    }

    async fn get_version(&self) -> Result<String, AdapterError> {
        let info = self.command("show info").await?;
        parse_version(&info)
            .ok_or_else(|| AdapterError::Protocol("no Version line in show info".to_string()))
    }

    async fn rotate_credential(
        &self,
        _scope: CredentialScope,
        _user: &str,
        _password: &str,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("haproxy holds no database credential"))
    }
}
