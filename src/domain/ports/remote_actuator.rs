//! Remote Actuator Port
//!
//! Runs a provisioning action on the host of a server. At-most-once: the
//! caller never retries an action on its own.

use crate::domain::entities::Server;
use crate::domain::errors::AdapterError;
use async_trait::async_trait;

#[async_trait]
pub trait RemoteActuator: Send + Sync {
    /// Run `command` for `server` with extra environment variables and
    /// return its output.
    async fn run_remote(
        &self,
        server: &Server,
        command: &str,
        env: &[(String, String)],
    ) -> Result<String, AdapterError>;
}
