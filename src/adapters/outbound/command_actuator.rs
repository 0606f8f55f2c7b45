//! Command Actuator
//!
//! Runs provisioning actions as local shell commands. The target server is
//! described to the command through `STEWARD_SERVER_*` environment
//! variables; a wrapper script is expected to reach the host (ssh, an
//! orchestrator CLI, ...).

use crate::domain::entities::Server;
use crate::domain::errors::AdapterError;
use crate::domain::ports::RemoteActuator;
use async_trait::async_trait;
use tokio::process::Command;

pub struct CommandActuator {
    shell: String,
}

impl CommandActuator {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for CommandActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteActuator for CommandActuator {
    async fn run_remote(
        &self,
        server: &Server,
        command: &str,
        env: &[(String, String)],
    ) -> Result<String, AdapterError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .env("STEWARD_SERVER_ID", &server.id)
            .env("STEWARD_SERVER_HOST", &server.host)
            .env("STEWARD_SERVER_PORT", server.port.to_string())
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
        } else {
            Err(AdapterError::Rejected(format!(
                "{} exited with {}: {}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            )))
        }
    }
}
