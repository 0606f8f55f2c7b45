//! Server Adapter Port
//!
//! Typed lifecycle interface to one database server. The core never speaks
//! the engine protocol directly; it only refreshes status and issues
//! high-level commands through this trait.

use crate::domain::entities::ServerStatus;
use crate::domain::errors::AdapterError;
use async_trait::async_trait;

/// Remote handle for one monitored database server.
///
/// Implementations are owned by the registry and shared as `Arc<dyn ...>`
/// with the monitor, the discovery pass and the rotation coordinator.
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    /// Open (or re-open) the management connection.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Read role, health, replication position and version.
    async fn refresh_status(&self) -> Result<ServerStatus, AdapterError>;

    /// Change the password of `user` on this server.
    async fn set_credential(&self, user: &str, password: &str) -> Result<(), AdapterError>;

    /// Flag that a configuration change needs a restart to take effect.
    async fn set_restart_flag(&self, required: bool) -> Result<(), AdapterError>;

    /// Run an administrative statement: user management or a dynamic
    /// configuration change. A refusal means the change needs a restart.
    async fn run_sql(&self, statement: &str) -> Result<(), AdapterError>;
}
