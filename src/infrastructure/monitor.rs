//! Server Monitor
//!
//! One refresh loop per registered server. Each tick reads the server's
//! status through its adapter and writes it back into the registry. A
//! server is only marked down after several consecutive failed refreshes.
//! A role or health change wakes the reconciliation loops.

use crate::application::reconciliation::ReconciliationEngine;
use crate::application::registry::TopologyRegistry;
use crate::domain::entities::ServerStatus;
use crate::domain::errors::{with_timeout, ClusterError};
use crate::infrastructure::shutdown::ShutdownController;
use crate::infrastructure::workers::KeyedWorkers;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between refreshes of one server
    pub interval: Duration,
    /// Timeout for each refresh
    pub call_timeout: Duration,
    /// Consecutive failed refreshes before the server is marked down
    pub failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Result of one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Role or health changed
    Changed,
    Unchanged,
    /// Refresh failed, the server keeps its last known status
    Failed { consecutive: u32 },
}

pub struct ServerMonitor {
    registry: Arc<TopologyRegistry>,
    engine: Arc<ReconciliationEngine>,
    workers: KeyedWorkers,
    failures: DashMap<String, u32>,
    config: MonitorConfig,
}

impl ServerMonitor {
    pub fn new(
        registry: Arc<TopologyRegistry>,
        engine: Arc<ReconciliationEngine>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            workers: KeyedWorkers::new(),
            failures: DashMap::new(),
            config,
        }
    }

    pub fn running_loops(&self) -> usize {
        self.workers.len()
    }

    /// Refresh server `id` once.
    pub async fn check_server(&self, id: &str) -> Result<CheckResult, ClusterError> {
        let adapter = self.registry.server_adapter(id)?;
        let before = self
            .registry
            .snapshot()
            .server(id)
            .map(|s| (s.role, s.health))
            .ok_or_else(|| ClusterError::server_not_found(id))?;

        let status = match with_timeout(self.config.call_timeout, adapter.refresh_status()).await {
            Ok(status) => {
                self.failures.remove(id);
                status
            }
            Err(e) => {
                let consecutive = {
                    let mut count = self.failures.entry(id.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                if consecutive < self.config.failure_threshold {
                    tracing::debug!(
                        "{}: refresh failed ({}/{}): {}",
                        id,
                        consecutive,
                        self.config.failure_threshold,
                        e
                    );
                    return Ok(CheckResult::Failed { consecutive });
                }
                if consecutive == self.config.failure_threshold {
                    tracing::warn!("{}: {} failed refreshes, marking down: {}", id, consecutive, e);
                }
                ServerStatus::down()
            }
        };

        self.registry.apply_status(id, &status)?;

        let after = self
            .registry
            .snapshot()
            .server(id)
            .map(|s| (s.role, s.health));
        if after == Some(before) {
            Ok(CheckResult::Unchanged)
        } else {
            tracing::info!(
                "{}: {}/{} -> {}/{}",
                id,
                before.0,
                before.1,
                status.role,
                status.health
            );
            self.engine.trigger();
            Ok(CheckResult::Changed)
        }
    }

    /// Keep one loop per registered server until shutdown.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownController) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            let mut stop = shutdown.subscribe();
            tracing::info!("server monitor started (interval {:?})", monitor.config.interval);

            loop {
                let ids: Vec<String> = monitor
                    .registry
                    .snapshot()
                    .servers
                    .into_iter()
                    .map(|s| s.id)
                    .collect();
                monitor.failures.retain(|id, _| ids.contains(id));
                monitor.workers.sync(&ids, |id| {
                    server_loop(Arc::clone(&monitor), id, shutdown.clone())
                });

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.recv() => break,
                }
            }

            monitor.workers.abort_all();
            tracing::info!("server monitor stopped");
        })
    }
}

async fn server_loop(monitor: Arc<ServerMonitor>, id: String, shutdown: ShutdownController) {
    let mut ticker = tokio::time::interval(monitor.config.interval);
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.recv() => break,
        }

        let _cycle = shutdown.cycle_guard();
        match monitor.check_server(&id).await {
            Ok(_) => {}
            Err(ClusterError::NotFound { .. }) => break,
            Err(e) => tracing::warn!("{}: monitor cycle failed: {}", id, e),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::MemoryAdapterFactory;
    use crate::application::failover::FailoverStateMachine;
    use crate::application::reconciliation::ReconcileConfig;
    use crate::application::registry::RegistryConfig;
    use crate::domain::entities::ServerSpec;
    use crate::domain::value_objects::{ServerHealth, ServerRole};

    async fn setup() -> (Arc<ServerMonitor>, Arc<TopologyRegistry>, Arc<MemoryAdapterFactory>) {
        let factory = Arc::new(MemoryAdapterFactory::new());
        let registry = Arc::new(TopologyRegistry::new(
            factory.clone(),
            Arc::new(FailoverStateMachine::new()),
            RegistryConfig {
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        ));
        factory.server("10.0.0.1:3306").set_status(ServerStatus::leader());
        factory.server("10.0.0.2:3306").set_status(ServerStatus::replica());
        for (id, address) in [("a", "10.0.0.1:3306"), ("b", "10.0.0.2:3306")] {
            registry
                .add_server(ServerSpec::parse(address).unwrap().with_id(id))
                .await
                .unwrap();
        }
        let engine = Arc::new(ReconciliationEngine::new(
            registry.clone(),
            ReconcileConfig::default(),
        ));
        let monitor = Arc::new(ServerMonitor::new(
            registry.clone(),
            engine,
            MonitorConfig {
                interval: Duration::from_millis(20),
                call_timeout: Duration::from_millis(100),
                failure_threshold: 2,
            },
        ));
        (monitor, registry, factory)
    }

    // ===== Check Tests =====

    #[tokio::test]
    async fn test_unchanged_status() {
        let (monitor, _, _) = setup().await;
        assert_eq!(monitor.check_server("b").await.unwrap(), CheckResult::Unchanged);
    }

    #[tokio::test]
    async fn test_lagging_replica_is_recorded() {
        let (monitor, registry, factory) = setup().await;
        factory.server("10.0.0.2:3306").set_status(ServerStatus::new(
            ServerRole::Replica,
            ServerHealth::ReplicationLagging,
        ));

        assert_eq!(monitor.check_server("b").await.unwrap(), CheckResult::Changed);
        assert_eq!(
            registry.snapshot().server("b").unwrap().health,
            ServerHealth::ReplicationLagging
        );
    }

    #[tokio::test]
    async fn test_down_after_threshold() {
        let (monitor, registry, factory) = setup().await;
        factory.server("10.0.0.2:3306").fail_refresh(true);

        assert_eq!(
            monitor.check_server("b").await.unwrap(),
            CheckResult::Failed { consecutive: 1 }
        );
        assert_eq!(registry.snapshot().server("b").unwrap().health, ServerHealth::Up);

        assert_eq!(monitor.check_server("b").await.unwrap(), CheckResult::Changed);
        assert_eq!(registry.snapshot().server("b").unwrap().health, ServerHealth::Down);

        factory.server("10.0.0.2:3306").fail_refresh(false);
        assert_eq!(monitor.check_server("b").await.unwrap(), CheckResult::Changed);
        assert_eq!(registry.snapshot().server("b").unwrap().health, ServerHealth::Up);
    }

    #[tokio::test]
    async fn test_switchover_keeps_one_leader() {
        let (monitor, registry, factory) = setup().await;
        factory.server("10.0.0.1:3306").set_status(ServerStatus::replica());
        factory.server("10.0.0.2:3306").set_status(ServerStatus::leader());

        monitor.check_server("b").await.unwrap();
        monitor.check_server("a").await.unwrap();

        let topo = registry.snapshot();
        assert_eq!(topo.leader.as_deref(), Some("b"));
        assert_eq!(topo.leader_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let (monitor, _, _) = setup().await;
        assert!(matches!(
            monitor.check_server("zz").await,
            Err(ClusterError::NotFound { .. })
        ));
    }

    // ===== Loop Tests =====

    #[tokio::test]
    async fn test_loops_follow_membership() {
        let (monitor, registry, factory) = setup().await;
        let shutdown = ShutdownController::new();
        let handle = monitor.start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(monitor.running_loops(), 2);

        factory.server("10.0.0.2:3306").set_status(ServerStatus::new(
            ServerRole::Replica,
            ServerHealth::ReplicationBroken,
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            registry.snapshot().server("b").unwrap().health,
            ServerHealth::ReplicationBroken
        );

        registry.remove_server("b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.running_loops(), 1);

        shutdown.shutdown();
        handle.await.unwrap();
        assert_eq!(monitor.running_loops(), 0);
    }
}
