//! Proxy Adapter Port
//!
//! Capability set shared by every proxy technology. One adapter per
//! technology implements it; the reconciliation engine and the rotation
//! coordinator only see this trait.

use crate::domain::entities::BackendTable;
use crate::domain::errors::AdapterError;
use crate::domain::value_objects::CredentialScope;
use async_trait::async_trait;

/// Management interface of a traffic-routing proxy.
///
/// Commands are idempotent and last-write-wins: re-issuing a command the
/// proxy already satisfies is harmless.
#[async_trait]
pub trait ProxyAdapter: Send + Sync {
    /// Read the live backend table (one remote call).
    async fn read_backend_state(&self) -> Result<BackendTable, AdapterError>;

    /// Point the write backend at `host:port`.
    async fn set_leader(&self, host: &str, port: u16) -> Result<(), AdapterError>;

    /// Stop sending new traffic to `server` within `backend`.
    async fn set_drain(&self, server: &str, backend: &str) -> Result<(), AdapterError>;

    /// Put `server` back into rotation within `backend`.
    async fn set_ready(&self, server: &str, backend: &str) -> Result<(), AdapterError>;

    /// Take `server` out of `backend` for maintenance.
    async fn set_maintenance(&self, server: &str, backend: &str) -> Result<(), AdapterError>;

    async fn get_version(&self) -> Result<String, AdapterError>;

    /// Push a rotated credential to the proxy.
    async fn rotate_credential(
        &self,
        scope: CredentialScope,
        user: &str,
        password: &str,
    ) -> Result<(), AdapterError>;
}
