//! Provisioning
//!
//! Start and stop actions run through the remote actuator. Each action is
//! spawned and its result comes back over a one-slot channel; the caller
//! waits on that channel under the action timeout and never retries.
//!
//! Configuration changes go straight to the server as statements. Any the
//! server refuses at runtime are deferred to the next start and the server
//! is flagged as needing a restart.

use crate::application::registry::TopologyRegistry;
use crate::domain::entities::{Server, ServerStatus};
use crate::domain::errors::{with_timeout, ClusterError};
use crate::domain::ports::RemoteActuator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub start_command: String,
    pub stop_command: String,
    /// Bound on one actuator call
    pub action_timeout: Duration,
    /// Start is confirmed by polling the server this many times
    pub wait_retries: u32,
    pub wait_tick: Duration,
    pub call_timeout: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            start_command: "steward-db start".to_string(),
            stop_command: "steward-db stop".to_string(),
            action_timeout: Duration::from_secs(120),
            wait_retries: 60,
            wait_tick: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of pushing configuration statements to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigOutcome {
    pub applied: usize,
    /// Statements the running server refused; they take effect on restart
    pub deferred: Vec<String>,
    pub restart_required: bool,
}

pub struct Provisioner {
    registry: Arc<TopologyRegistry>,
    actuator: Arc<dyn RemoteActuator>,
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(
        registry: Arc<TopologyRegistry>,
        actuator: Arc<dyn RemoteActuator>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            registry,
            actuator,
            config,
        }
    }

    /// Run the start action, then wait until the server answers.
    pub async fn start_server(&self, id: &str) -> Result<String, ClusterError> {
        let server = self.server(id)?;
        tracing::info!("starting {} ({})", server.id, server.address());

        let output = self.run_action(&server, &self.config.start_command, "start").await?;
        self.wait_database_start(id).await?;

        let adapter = self.registry.server_adapter(id)?;
        if let Err(e) = with_timeout(self.config.call_timeout, adapter.set_restart_flag(false)).await {
            tracing::warn!("could not clear restart flag on {}: {}", id, e);
        }
        self.registry.set_restart_required(id, false)?;

        tracing::info!("{} started", id);
        Ok(output)
    }

    /// Run the stop action and mark the server down.
    pub async fn stop_server(&self, id: &str) -> Result<String, ClusterError> {
        let server = self.server(id)?;
        tracing::info!("stopping {} ({})", server.id, server.address());

        let output = self.run_action(&server, &self.config.stop_command, "stop").await?;
        self.registry.apply_status(id, &ServerStatus::down())?;
        Ok(output)
    }

    /// Push configuration statements to a running server, in order.
    ///
    /// A refused statement does not stop the ones after it. When any is
    /// refused the restart flag is raised on the server and in the registry.
    pub async fn apply_config(
        &self,
        id: &str,
        statements: &[String],
    ) -> Result<ConfigOutcome, ClusterError> {
        if statements.is_empty() {
            return Err(ClusterError::Invalid {
                field: "statements",
                reason: "no configuration statements given".to_string(),
            });
        }
        let adapter = self.registry.server_adapter(id)?;

        let mut outcome = ConfigOutcome {
            applied: 0,
            deferred: Vec::new(),
            restart_required: false,
        };
        for statement in statements {
            match with_timeout(self.config.call_timeout, adapter.run_sql(statement)).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    tracing::info!("{} deferred on {}: {}", statement, id, e);
                    outcome.deferred.push(statement.clone());
                }
            }
        }

        if !outcome.deferred.is_empty() {
            if let Err(e) = with_timeout(self.config.call_timeout, adapter.set_restart_flag(true)).await {
                tracing::warn!("could not set restart flag on {}: {}", id, e);
            }
            self.registry.set_restart_required(id, true)?;
            outcome.restart_required = true;
        }

        tracing::info!(
            "{}: {} statements applied, {} deferred",
            id,
            outcome.applied,
            outcome.deferred.len()
        );
        Ok(outcome)
    }

    /// Run one actuator call. A failure, a dropped result, or no answer
    /// within `action_timeout` is a provisioning error.
    pub async fn run_action(
        &self,
        server: &Server,
        command: &str,
        action: &str,
    ) -> Result<String, ClusterError> {
        let (tx, mut rx) = mpsc::channel(1);
        let actuator = Arc::clone(&self.actuator);
        let target = server.clone();
        let command_line = command.to_string();
        let env = vec![("STEWARD_ACTION".to_string(), action.to_string())];

        tokio::spawn(async move {
            let result = actuator.run_remote(&target, &command_line, &env).await;
            let _ = tx.send(result).await;
        });

        let provisioning = |reason: String| ClusterError::Provisioning {
            target: server.id.clone(),
            reason,
        };

        match tokio::time::timeout(self.config.action_timeout, rx.recv()).await {
            Ok(Some(Ok(output))) => Ok(output),
            Ok(Some(Err(e))) => Err(provisioning(format!("{} failed: {}", action, e))),
            Ok(None) => Err(provisioning(format!("{} ended without a result", action))),
            Err(_) => Err(provisioning(format!(
                "{} gave no result within {:?}",
                action, self.config.action_timeout
            ))),
        }
    }

    /// Poll the server until it is reachable, at most `wait_retries` ticks.
    pub async fn wait_database_start(&self, id: &str) -> Result<(), ClusterError> {
        let adapter = self.registry.server_adapter(id)?;
        let mut ticker = tokio::time::interval(self.config.wait_tick);

        for attempt in 0..self.config.wait_retries {
            ticker.tick().await;
            match with_timeout(self.config.call_timeout, adapter.refresh_status()).await {
                Ok(status) if status.health.is_reachable() => {
                    self.registry.apply_status(id, &status)?;
                    return Ok(());
                }
                Ok(_) => tracing::debug!("{} not up yet (attempt {})", id, attempt + 1),
                Err(e) => tracing::debug!("{} not answering yet: {}", id, e),
            }
        }

        Err(ClusterError::Provisioning {
            target: id.to_string(),
            reason: format!(
                "not reachable after {} checks every {:?}",
                self.config.wait_retries, self.config.wait_tick
            ),
        })
    }

    fn server(&self, id: &str) -> Result<Server, ClusterError> {
        self.registry
            .snapshot()
            .server(id)
            .cloned()
            .ok_or_else(|| ClusterError::server_not_found(id))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::MemoryAdapterFactory;
    use crate::application::failover::FailoverStateMachine;
    use crate::application::registry::RegistryConfig;
    use crate::domain::entities::ServerSpec;
    use crate::domain::errors::{AdapterError, ErrorKind};
    use crate::domain::value_objects::ServerHealth;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records calls and brings the simulated server up on "start".
    struct ScriptedActuator {
        factory: Arc<MemoryAdapterFactory>,
        calls: Mutex<Vec<(String, String)>>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl RemoteActuator for ScriptedActuator {
        async fn run_remote(
            &self,
            server: &Server,
            command: &str,
            env: &[(String, String)],
        ) -> Result<String, AdapterError> {
            let action = env
                .iter()
                .find(|(k, _)| k == "STEWARD_ACTION")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            self.calls.lock().push((command.to_string(), action.clone()));
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(AdapterError::Rejected("disk full".to_string()));
            }
            if action == "start" {
                self.factory
                    .server(&server.address())
                    .set_status(ServerStatus::replica());
            }
            Ok(format!("{} done", action))
        }
    }

    async fn setup(
        delay: Duration,
        fail: bool,
    ) -> (Provisioner, Arc<TopologyRegistry>, Arc<ScriptedActuator>, String) {
        let factory = Arc::new(MemoryAdapterFactory::new());
        let registry = Arc::new(TopologyRegistry::new(
            factory.clone(),
            Arc::new(FailoverStateMachine::new()),
            RegistryConfig {
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        ));
        let id = registry
            .add_server(ServerSpec::parse("10.0.0.2:3306").unwrap())
            .await
            .unwrap();

        let actuator = Arc::new(ScriptedActuator {
            factory,
            calls: Mutex::new(Vec::new()),
            delay,
            fail,
        });
        let provisioner = Provisioner::new(
            registry.clone(),
            actuator.clone(),
            ProvisionConfig {
                action_timeout: Duration::from_millis(200),
                wait_retries: 5,
                wait_tick: Duration::from_millis(10),
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );
        (provisioner, registry, actuator, id)
    }

    #[tokio::test]
    async fn test_start_waits_for_server() {
        let (provisioner, registry, actuator, id) = setup(Duration::ZERO, false).await;
        registry.set_restart_required(&id, true).unwrap();

        let output = provisioner.start_server(&id).await.unwrap();

        assert_eq!(output, "start done");
        let server = registry.snapshot().server(&id).cloned().unwrap();
        assert_eq!(server.health, ServerHealth::Up);
        assert!(!server.restart_required);
        assert_eq!(
            actuator.calls.lock().as_slice(),
            &[("steward-db start".to_string(), "start".to_string())]
        );
    }

    #[tokio::test]
    async fn test_stop_marks_server_down() {
        let (provisioner, registry, _, id) = setup(Duration::ZERO, false).await;
        provisioner.stop_server(&id).await.unwrap();
        assert_eq!(
            registry.snapshot().server(&id).unwrap().health,
            ServerHealth::Down
        );
    }

    #[tokio::test]
    async fn test_action_timeout_is_provisioning_error() {
        let (provisioner, _, actuator, id) = setup(Duration::from_secs(5), false).await;

        let err = provisioner.start_server(&id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FatalProvisioning);
        assert!(err.to_string().contains("no result"));
        assert_eq!(actuator.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_actuator_failure_surfaces() {
        let (provisioner, _, _, id) = setup(Duration::ZERO, false).await;
        let (failing, _, _, failing_id) = setup(Duration::ZERO, true).await;

        assert!(provisioner.stop_server(&id).await.is_ok());
        let err = failing.stop_server(&failing_id).await.unwrap_err();
        assert!(matches!(err, ClusterError::Provisioning { ref reason, .. } if reason.contains("disk full")));
    }

    #[tokio::test]
    async fn test_wait_gives_up() {
        let (provisioner, _, _, id) = setup(Duration::ZERO, false).await;
        // Memory servers start down and nothing brings this one up.
        let err = provisioner.wait_database_start(&id).await.unwrap_err();
        assert!(err.to_string().contains("not reachable after 5 checks"));
    }

    // ===== Configuration =====

    #[tokio::test]
    async fn test_refused_statement_requires_restart() {
        let (provisioner, registry, actuator, id) = setup(Duration::ZERO, false).await;
        let memory = actuator.factory.server("10.0.0.2:3306");
        memory.static_variable("innodb_log_file_size");

        let outcome = provisioner
            .apply_config(
                &id,
                &[
                    "SET GLOBAL max_connections = 500".to_string(),
                    "SET GLOBAL innodb_log_file_size = 1073741824".to_string(),
                    "SET GLOBAL long_query_time = 2".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.applied, 2);
        assert_eq!(
            outcome.deferred,
            vec!["SET GLOBAL innodb_log_file_size = 1073741824".to_string()]
        );
        assert!(outcome.restart_required);
        assert!(memory.restart_flag());
        assert!(registry.snapshot().server(&id).unwrap().restart_required);

        // A start clears the flag on both sides.
        provisioner.start_server(&id).await.unwrap();
        assert!(!memory.restart_flag());
        assert!(!registry.snapshot().server(&id).unwrap().restart_required);
    }

    #[tokio::test]
    async fn test_accepted_config_needs_no_restart() {
        let (provisioner, registry, actuator, id) = setup(Duration::ZERO, false).await;

        let outcome = provisioner
            .apply_config(&id, &["SET GLOBAL max_connections = 500".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(outcome.deferred.is_empty());
        assert!(!outcome.restart_required);
        assert!(!actuator.factory.server("10.0.0.2:3306").restart_flag());
        assert!(!registry.snapshot().server(&id).unwrap().restart_required);
    }

    #[tokio::test]
    async fn test_empty_config_rejected() {
        let (provisioner, _, _, id) = setup(Duration::ZERO, false).await;
        assert!(matches!(
            provisioner.apply_config(&id, &[]).await,
            Err(ClusterError::Invalid { field: "statements", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let (provisioner, _, _, _) = setup(Duration::ZERO, false).await;
        assert!(matches!(
            provisioner.start_server("db-missing").await,
            Err(ClusterError::NotFound { .. })
        ));
    }
}
