//! Proxy Reconciliation Engine
//!
//! Drives each proxy toward the registry: read the live backend table,
//! plan with `BackendPlanner`, execute the commands. Commands are
//! fire-and-log; a failure is retried on the next cycle and an I/O error
//! only aborts the cycle of the proxy it happened on.

use crate::application::registry::TopologyRegistry;
use crate::domain::errors::{with_timeout, AdapterError, ClusterError};
use crate::domain::ports::ProxyAdapter;
use crate::domain::services::{BackendPlanner, PlanSkip, ProxyCommand};
use crate::infrastructure::shutdown::ShutdownController;
use crate::infrastructure::workers::KeyedWorkers;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Cycle period of each proxy loop
    pub interval: Duration,
    /// Bound on every proxy call
    pub call_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCommand {
    pub command: ProxyCommand,
    pub error: String,
}

/// Outcome of one reconciliation cycle for one proxy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub proxy: String,
    pub issued: Vec<ProxyCommand>,
    pub failed: Vec<FailedCommand>,
    /// Leader pins held back because a failover is running
    pub held_back: Vec<ProxyCommand>,
    pub skipped: Vec<PlanSkip>,
}

impl CycleReport {
    /// Nothing was sent and nothing is pending.
    pub fn is_converged(&self) -> bool {
        self.issued.is_empty() && self.failed.is_empty() && self.held_back.is_empty()
    }
}

pub struct ReconciliationEngine {
    registry: Arc<TopologyRegistry>,
    trigger: Arc<Notify>,
    workers: KeyedWorkers,
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    pub fn new(registry: Arc<TopologyRegistry>, config: ReconcileConfig) -> Self {
        Self {
            registry,
            trigger: Arc::new(Notify::new()),
            workers: KeyedWorkers::new(),
            config,
        }
    }

    /// Run one cycle for proxy `id`.
    pub async fn reconcile_proxy(&self, id: &str) -> Result<CycleReport, ClusterError> {
        let adapter = self.registry.proxy_adapter(id)?;
        let timeout = self.config.call_timeout;

        let observed = with_timeout(timeout, adapter.read_backend_state())
            .await
            .map_err(|e| ClusterError::adapter(id, e))?;
        let version = match with_timeout(timeout, adapter.get_version()).await {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::debug!("{}: version unavailable: {}", id, e);
                None
            }
        };
        self.registry
            .record_proxy_observation(id, observed.clone(), version)?;

        let topology = self.registry.snapshot();
        let proxy = topology
            .proxy(id)
            .ok_or_else(|| ClusterError::proxy_not_found(id))?;
        let plan = BackendPlanner::plan(&topology, proxy, &observed);

        let mut report = CycleReport {
            proxy: id.to_string(),
            skipped: plan.skipped.clone(),
            ..Default::default()
        };

        for skip in &plan.skipped {
            match skip {
                PlanSkip::NoLeader => {
                    tracing::warn!("{}: no leader in the registry, write backend left alone", id)
                }
                PlanSkip::DiscoveryBehind { leader } => tracing::warn!(
                    "{}: leader {} missing from proxy, waiting for discovery (topology v{}, discovered v{})",
                    id,
                    leader,
                    topology.version,
                    topology.discovered_version
                ),
                PlanSkip::UnknownBackend { name } => {
                    tracing::debug!("{}: backend {} maps to no known server", id, name)
                }
            }
        }

        let failover_running = self.registry.failover().is_in_progress();
        for command in plan.commands {
            if command.is_leader_pin() && failover_running {
                tracing::warn!(
                    "{}: {} held back: {}",
                    id,
                    command.describe(),
                    ClusterError::FailoverBusy
                );
                report.held_back.push(command);
                continue;
            }

            match with_timeout(timeout, execute(adapter.as_ref(), &command)).await {
                Ok(()) => {
                    tracing::info!("{}: {}", id, command.describe());
                    report.issued.push(command);
                }
                Err(e) => {
                    tracing::error!("{}: {} failed: {}", id, command.describe(), e);
                    report.failed.push(FailedCommand {
                        command,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Run one cycle on every proxy, concurrently. Each proxy's result is
    /// independent of the others.
    pub async fn reconcile_all(&self) -> Vec<Result<CycleReport, ClusterError>> {
        let ids: Vec<String> = self.registry.snapshot().proxies.into_iter().map(|p| p.id).collect();
        join_all(ids.iter().map(|id| self.reconcile_proxy(id))).await
    }

    /// Wake every proxy loop for an immediate cycle (backend state change).
    pub fn trigger(&self) {
        self.trigger.notify_waiters();
    }

    pub fn running_loops(&self) -> usize {
        self.workers.len()
    }

    /// Keep one loop per registered proxy until shutdown.
    ///
    /// Membership is re-read every interval: loops start for new proxies and
    /// stop for removed ones.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownController) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.interval);
            let mut stop = shutdown.subscribe();
            tracing::info!(
                "reconciliation started (interval {:?})",
                engine.config.interval
            );

            loop {
                let ids: Vec<String> = engine
                    .registry
                    .snapshot()
                    .proxies
                    .into_iter()
                    .map(|p| p.id)
                    .collect();
                let (started, stopped) = engine.workers.sync(&ids, |id| {
                    proxy_loop(Arc::clone(&engine), id, shutdown.clone())
                });
                if started > 0 || stopped > 0 {
                    tracing::debug!("reconcile loops: {} started, {} stopped", started, stopped);
                }

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.recv() => break,
                }
            }

            engine.workers.abort_all();
            tracing::info!("reconciliation stopped");
        })
    }
}

async fn proxy_loop(engine: Arc<ReconciliationEngine>, id: String, shutdown: ShutdownController) {
    let mut ticker = tokio::time::interval(engine.config.interval);
    let mut stop = shutdown.subscribe();
    let trigger = Arc::clone(&engine.trigger);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = trigger.notified() => {
                tracing::debug!("{}: triggered cycle", id);
            }
            _ = stop.recv() => break,
        }

        let _cycle = shutdown.cycle_guard();
        match engine.reconcile_proxy(&id).await {
            Ok(report) if !report.is_converged() => tracing::debug!(
                "{}: {} issued, {} failed, {} held back",
                id,
                report.issued.len(),
                report.failed.len(),
                report.held_back.len()
            ),
            Ok(_) => {}
            Err(ClusterError::NotFound { .. }) => {
                tracing::debug!("{}: proxy removed, loop exiting", id);
                break;
            }
            Err(e) => tracing::warn!("reconcile cycle aborted: {}", e),
        }
    }
}

async fn execute(adapter: &dyn ProxyAdapter, command: &ProxyCommand) -> Result<(), AdapterError> {
    match command {
        ProxyCommand::SetLeader { host, port } => adapter.set_leader(host, *port).await,
        ProxyCommand::SetDrain { server, backend } => adapter.set_drain(server, backend).await,
        ProxyCommand::SetReady { server, backend } => adapter.set_ready(server, backend).await,
        ProxyCommand::SetMaintenance { server, backend } => {
            adapter.set_maintenance(server, backend).await
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::MemoryAdapterFactory;
    use crate::application::failover::FailoverStateMachine;
    use crate::application::registry::RegistryConfig;
    use crate::domain::entities::{BackendEntry, BackendTable, ProxySpec, ServerSpec, ServerStatus};
    use crate::domain::value_objects::{BackendState, ProxyTechnology, ServerHealth, ServerRole};

    struct Harness {
        registry: Arc<TopologyRegistry>,
        factory: Arc<MemoryAdapterFactory>,
        engine: Arc<ReconciliationEngine>,
        proxy_id: String,
    }

    /// Leader `a` at 10.0.0.1, replica `b` at 10.0.0.2, one HAProxy.
    async fn harness(b_status: ServerStatus, table: BackendTable) -> Harness {
        let factory = Arc::new(MemoryAdapterFactory::new());
        let registry = Arc::new(TopologyRegistry::new(
            factory.clone(),
            Arc::new(FailoverStateMachine::new()),
            RegistryConfig {
                call_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        ));

        factory.server("10.0.0.1:3306").set_status(ServerStatus::leader());
        factory.server("10.0.0.2:3306").set_status(b_status);
        registry
            .add_server(ServerSpec::parse("10.0.0.1:3306").unwrap().with_id("a"))
            .await
            .unwrap();
        registry
            .add_server(ServerSpec::parse("10.0.0.2:3306").unwrap().with_id("b"))
            .await
            .unwrap();

        factory.proxy("10.0.1.1:1999").set_table(table);
        let proxy_id = registry
            .add_proxy(ProxySpec::new(ProxyTechnology::Haproxy, "10.0.1.1", 1999))
            .await
            .unwrap();
        registry.mark_discovered();

        let engine = Arc::new(ReconciliationEngine::new(
            registry.clone(),
            ReconcileConfig {
                interval: Duration::from_millis(20),
                call_timeout: Duration::from_millis(200),
            },
        ));
        Harness {
            registry,
            factory,
            engine,
            proxy_id,
        }
    }

    fn table(write: &str, a: BackendState, b: BackendState) -> BackendTable {
        BackendTable {
            write: vec![BackendEntry::new("leader", write, BackendState::Up)],
            read: vec![
                BackendEntry::new("a", "10.0.0.1:3306", a),
                BackendEntry::new("b", "10.0.0.2:3306", b),
            ],
        }
    }

    // ===== Cycle Tests =====

    #[tokio::test]
    async fn test_lagging_replica_drained_in_one_cycle() {
        let h = harness(
            ServerStatus::new(ServerRole::Replica, ServerHealth::ReplicationLagging),
            table("10.0.0.1:3306", BackendState::Drain, BackendState::Up),
        )
        .await;

        let report = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert_eq!(report.issued.len(), 1);

        let proxy = h.factory.proxy("10.0.1.1:1999");
        assert_eq!(proxy.read_state("b"), Some(BackendState::Drain));
        assert!(proxy
            .commands()
            .iter()
            .all(|c| !c.is_leader_pin()));
    }

    #[tokio::test]
    async fn test_converges_within_two_cycles() {
        let h = harness(
            ServerStatus::replica(),
            table("10.0.0.2:3306", BackendState::Up, BackendState::Drain),
        )
        .await;

        let first = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert!(!first.is_converged());

        let second = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert!(second.is_converged(), "still issuing: {:?}", second.issued);

        let table = h.factory.proxy("10.0.1.1:1999").table();
        assert_eq!(table.write[0].address, "10.0.0.1:3306");
        assert_eq!(table.read_entry("a").unwrap().state, BackendState::Drain);
        assert_eq!(table.read_entry("b").unwrap().state, BackendState::Up);

        let observed = h.registry.snapshot().proxy(&h.proxy_id).unwrap().observed.clone();
        assert_eq!(observed, table);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_only_that_proxy() {
        let h = harness(
            ServerStatus::replica(),
            table("10.0.0.1:3306", BackendState::Drain, BackendState::Up),
        )
        .await;
        h.factory
            .proxy("10.0.1.2:1999")
            .set_table(table("10.0.0.1:3306", BackendState::Drain, BackendState::Drain));
        h.registry
            .add_proxy(ProxySpec::new(ProxyTechnology::Haproxy, "10.0.1.2", 1999))
            .await
            .unwrap();
        h.factory.proxy("10.0.1.1:1999").fail_reads(true);

        let results = h.engine.reconcile_all().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.issued.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commands_are_reported() {
        let h = harness(
            ServerStatus::new(ServerRole::Replica, ServerHealth::ReplicationBroken),
            table("10.0.0.1:3306", BackendState::Drain, BackendState::Up),
        )
        .await;
        h.factory.proxy("10.0.1.1:1999").fail_commands(true);

        let report = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert!(report.issued.is_empty());
        assert_eq!(report.failed.len(), 1);

        h.factory.proxy("10.0.1.1:1999").fail_commands(false);
        let report = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert_eq!(report.issued.len(), 1);
    }

    #[tokio::test]
    async fn test_leader_pin_held_back_during_failover() {
        let h = harness(
            ServerStatus::new(ServerRole::Replica, ServerHealth::ReplicationLagging),
            table("10.0.0.2:3306", BackendState::Drain, BackendState::Up),
        )
        .await;

        let guard = h.registry.failover().enter().unwrap();
        let report = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert_eq!(report.held_back.len(), 1);
        // The drain still goes through.
        assert_eq!(report.issued.len(), 1);
        drop(guard);

        let report = h.engine.reconcile_proxy(&h.proxy_id).await.unwrap();
        assert!(report.issued.iter().any(|c| c.is_leader_pin()));
    }

    // ===== Loop Tests =====

    #[tokio::test]
    async fn test_background_loops_converge_and_stop() {
        let h = harness(
            ServerStatus::replica(),
            table("10.0.0.2:3306", BackendState::Up, BackendState::Drain),
        )
        .await;
        let shutdown = ShutdownController::new();
        let handle = h.engine.start(shutdown.clone());

        let proxy = h.factory.proxy("10.0.1.1:1999");
        let converged = async {
            loop {
                let table = proxy.table();
                if table.write[0].address == "10.0.0.1:3306"
                    && table.read_entry("b").map(|e| e.state.clone()) == Some(BackendState::Up)
                {
                    break;
                }
                h.engine.trigger();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), converged)
            .await
            .unwrap();
        assert_eq!(h.engine.running_loops(), 1);

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.engine.running_loops(), 0);
    }
}
