//! Topology Registry
//!
//! Single owner of the cluster topology. Membership changes run inside the
//! failover bracket; the in-memory mutation itself takes one cluster-wide
//! lock and never performs network I/O while holding it.

use crate::application::failover::FailoverStateMachine;
use crate::domain::entities::{
    BackendTable, ClusterTopology, Proxy, ProxySpec, Server, ServerSpec, ServerStatus,
};
use crate::domain::errors::{with_timeout, ClusterError};
use crate::domain::ports::{AdapterFactory, ProxyAdapter, ServerAdapter};
use crate::domain::value_objects::{LeaderReadPolicy, ServerRole};
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Called with the former leader when the registry loses its leader.
pub type LeaderLostHook = Arc<dyn Fn(&Server) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How many ticks a membership change waits for a running failover
    pub mutation_wait_retries: u32,
    pub mutation_wait_tick: Duration,
    /// Bound on every remote call made by the registry
    pub call_timeout: Duration,
    pub read_policy: LeaderReadPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mutation_wait_retries: 30,
            mutation_wait_tick: Duration::from_millis(100),
            call_timeout: Duration::from_secs(5),
            read_policy: LeaderReadPolicy::WriteOnly,
        }
    }
}

struct ServerSlot {
    server: Server,
    adapter: Arc<dyn ServerAdapter>,
}

struct ProxySlot {
    proxy: Proxy,
    adapter: Arc<dyn ProxyAdapter>,
}

#[derive(Default)]
struct RegistryState {
    servers: Vec<ServerSlot>,
    proxies: Vec<ProxySlot>,
    leader: Option<String>,
    version: u64,
    discovered_version: u64,
}

impl RegistryState {
    fn server_mut(&mut self, id: &str) -> Result<&mut Server, ClusterError> {
        self.servers
            .iter_mut()
            .map(|slot| &mut slot.server)
            .find(|s| s.id == id)
            .ok_or_else(|| ClusterError::server_not_found(id))
    }

    /// Make `id` the only leader. Returns true when anything changed.
    fn promote(&mut self, id: &str) -> bool {
        let mut changed = false;
        for slot in self.servers.iter_mut() {
            if slot.server.id == id {
                if slot.server.role != ServerRole::Leader {
                    slot.server.role = ServerRole::Leader;
                    changed = true;
                }
            } else if slot.server.role == ServerRole::Leader {
                tracing::warn!("demoting {} so that {} is the only leader", slot.server.id, id);
                slot.server.role = ServerRole::Unknown;
                changed = true;
            }
        }
        if self.leader.as_deref() != Some(id) {
            self.leader = Some(id.to_string());
            changed = true;
        }
        if changed {
            self.version += 1;
        }
        changed
    }
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub refreshed: usize,
    pub failed: Vec<String>,
}

pub struct TopologyRegistry {
    state: RwLock<RegistryState>,
    failover: Arc<FailoverStateMachine>,
    factory: Arc<dyn AdapterFactory>,
    on_leader_lost: RwLock<Option<LeaderLostHook>>,
    config: RegistryConfig,
}

impl TopologyRegistry {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        failover: Arc<FailoverStateMachine>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            failover,
            factory,
            on_leader_lost: RwLock::new(None),
            config,
        }
    }

    pub fn failover(&self) -> &Arc<FailoverStateMachine> {
        &self.failover
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register the re-election hook fired when the leader goes away.
    pub fn on_leader_lost(&self, hook: LeaderLostHook) {
        *self.on_leader_lost.write() = Some(hook);
    }

    // ===== Membership =====

    /// Add a server, then run a discovery pass before leaving the failover
    /// bracket.
    pub async fn add_server(&self, spec: ServerSpec) -> Result<String, ClusterError> {
        let _guard = self
            .failover
            .enter_with_retry(self.config.mutation_wait_retries, self.config.mutation_wait_tick)
            .await?;

        let server = Server::from_spec(spec);
        let adapter = self.factory.server_adapter(&server)?;
        let id = server.id.clone();
        let address = server.address();

        {
            let mut state = self.state.write();
            if state
                .servers
                .iter()
                .any(|slot| slot.server.address() == address || slot.server.id == id)
            {
                return Err(ClusterError::DuplicateServer { address });
            }
            state.servers.push(ServerSlot {
                server,
                adapter: Arc::clone(&adapter),
            });
            state.version += 1;
        }
        tracing::info!("added server {} ({})", id, address);

        if let Err(e) = with_timeout(self.config.call_timeout, adapter.connect()).await {
            tracing::warn!("server {} not reachable yet: {}", id, e);
        }
        self.discover().await;

        Ok(id)
    }

    pub async fn remove_server(&self, id: &str) -> Result<(), ClusterError> {
        let _guard = self
            .failover
            .enter_with_retry(self.config.mutation_wait_retries, self.config.mutation_wait_tick)
            .await?;

        let lost_leader = {
            let mut state = self.state.write();
            let index = state
                .servers
                .iter()
                .position(|slot| slot.server.id == id)
                .ok_or_else(|| ClusterError::server_not_found(id))?;
            let removed = state.servers.remove(index).server;
            state.version += 1;

            if state.leader.as_deref() == Some(id) {
                state.leader = None;
                Some(removed)
            } else {
                None
            }
        };
        tracing::info!("removed server {}", id);

        if let Some(leader) = lost_leader {
            tracing::warn!("leader {} removed from the topology", leader.id);
            self.fire_leader_lost(&leader);
        }
        Ok(())
    }

    pub async fn add_proxy(&self, spec: ProxySpec) -> Result<String, ClusterError> {
        let _guard = self
            .failover
            .enter_with_retry(self.config.mutation_wait_retries, self.config.mutation_wait_tick)
            .await?;

        let proxy = Proxy::from_spec(spec);
        let adapter = self.factory.proxy_adapter(&proxy)?;
        let id = proxy.id.clone();

        {
            let mut state = self.state.write();
            let duplicate = state.proxies.iter().any(|slot| {
                slot.proxy.id == id
                    || (slot.proxy.technology == proxy.technology
                        && slot.proxy.identity() == proxy.identity())
            });
            if duplicate {
                return Err(ClusterError::DuplicateProxy {
                    technology: proxy.technology.to_string(),
                    address: proxy.address(),
                });
            }
            tracing::info!("added {} proxy {} ({})", proxy.technology, id, proxy.address());
            state.proxies.push(ProxySlot { proxy, adapter });
            state.version += 1;
        }

        Ok(id)
    }

    pub async fn remove_proxy(&self, id: &str) -> Result<(), ClusterError> {
        let _guard = self
            .failover
            .enter_with_retry(self.config.mutation_wait_retries, self.config.mutation_wait_tick)
            .await?;

        let mut state = self.state.write();
        let index = state
            .proxies
            .iter()
            .position(|slot| slot.proxy.id == id)
            .ok_or_else(|| ClusterError::proxy_not_found(id))?;
        state.proxies.remove(index);
        state.version += 1;
        tracing::info!("removed proxy {}", id);
        Ok(())
    }

    // ===== Reads =====

    /// Consistent copy of the topology. No lock is held once it returns.
    pub fn snapshot(&self) -> ClusterTopology {
        let state = self.state.read();
        ClusterTopology {
            servers: state.servers.iter().map(|slot| slot.server.clone()).collect(),
            proxies: state.proxies.iter().map(|slot| slot.proxy.clone()).collect(),
            leader: state.leader.clone(),
            version: state.version,
            discovered_version: state.discovered_version,
            read_policy: self.config.read_policy,
        }
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn server_adapter(&self, id: &str) -> Result<Arc<dyn ServerAdapter>, ClusterError> {
        self.state
            .read()
            .servers
            .iter()
            .find(|slot| slot.server.id == id)
            .map(|slot| Arc::clone(&slot.adapter))
            .ok_or_else(|| ClusterError::server_not_found(id))
    }

    pub fn proxy_adapter(&self, id: &str) -> Result<Arc<dyn ProxyAdapter>, ClusterError> {
        self.state
            .read()
            .proxies
            .iter()
            .find(|slot| slot.proxy.id == id)
            .map(|slot| Arc::clone(&slot.adapter))
            .ok_or_else(|| ClusterError::proxy_not_found(id))
    }

    /// Every server together with its adapter.
    pub fn server_handles(&self) -> Vec<(Server, Arc<dyn ServerAdapter>)> {
        self.state
            .read()
            .servers
            .iter()
            .map(|slot| (slot.server.clone(), Arc::clone(&slot.adapter)))
            .collect()
    }

    /// Every proxy together with its adapter.
    pub fn proxy_handles(&self) -> Vec<(Proxy, Arc<dyn ProxyAdapter>)> {
        self.state
            .read()
            .proxies
            .iter()
            .map(|slot| (slot.proxy.clone(), Arc::clone(&slot.adapter)))
            .collect()
    }

    // ===== Status updates =====

    /// Write back a refreshed status.
    ///
    /// A server reporting itself leader becomes the only leader. A leader
    /// reporting another role while reachable loses the leadership.
    pub fn apply_status(&self, id: &str, status: &ServerStatus) -> Result<(), ClusterError> {
        let lost_leader = {
            let mut state = self.state.write();
            let server = state.server_mut(id)?;
            let was_leader = server.is_leader();
            server.apply_status(status);

            if status.health.is_reachable() && status.role == ServerRole::Leader {
                if state.promote(id) {
                    tracing::info!("{} is the leader (topology v{})", id, state.version);
                }
                None
            } else if was_leader && status.health.is_reachable() {
                let server = state.server_mut(id)?.clone();
                if state.leader.as_deref() == Some(id) {
                    state.leader = None;
                }
                state.version += 1;
                Some(server)
            } else {
                None
            }
        };

        if let Some(leader) = lost_leader {
            tracing::warn!("{} no longer reports itself leader ({})", leader.id, leader.role);
            self.fire_leader_lost(&leader);
        }
        Ok(())
    }

    pub fn set_leader(&self, id: &str) -> Result<(), ClusterError> {
        let mut state = self.state.write();
        state.server_mut(id)?;
        if state.promote(id) {
            tracing::info!("leader set to {} (topology v{})", id, state.version);
        }
        Ok(())
    }

    pub fn clear_leader(&self) {
        let mut state = self.state.write();
        if let Some(id) = state.leader.take() {
            if let Ok(server) = state.server_mut(&id) {
                server.role = ServerRole::Unknown;
            }
            state.version += 1;
            tracing::info!("leader {} cleared (topology v{})", id, state.version);
        }
    }

    pub fn set_maintenance(&self, id: &str, enabled: bool) -> Result<(), ClusterError> {
        let mut state = self.state.write();
        let server = state.server_mut(id)?;
        server.maintenance = enabled;
        tracing::info!("maintenance {} on {}", if enabled { "enabled" } else { "disabled" }, id);
        Ok(())
    }

    pub fn set_ignored(&self, id: &str, ignored: bool) -> Result<(), ClusterError> {
        self.state.write().server_mut(id)?.is_ignored = ignored;
        Ok(())
    }

    pub fn set_restart_required(&self, id: &str, required: bool) -> Result<(), ClusterError> {
        self.state.write().server_mut(id)?.restart_required = required;
        Ok(())
    }

    /// Store the last table read from a proxy. Status only: the topology
    /// version is not bumped.
    pub fn record_proxy_observation(
        &self,
        id: &str,
        table: BackendTable,
        version: Option<String>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.write();
        let slot = state
            .proxies
            .iter_mut()
            .find(|slot| slot.proxy.id == id)
            .ok_or_else(|| ClusterError::proxy_not_found(id))?;
        slot.proxy.observed = table;
        if let Some(version) = version {
            slot.proxy.version = version;
        }
        Ok(())
    }

    pub fn mark_discovered(&self) {
        let mut state = self.state.write();
        state.discovered_version = state.version;
    }

    // ===== Discovery =====

    /// Refresh every server and record the result.
    ///
    /// Refreshes run concurrently outside the lock. A failed refresh marks
    /// the server down.
    pub async fn discover(&self) -> DiscoveryReport {
        let handles = self.server_handles();
        let timeout = self.config.call_timeout;

        let results = join_all(handles.into_iter().map(|(server, adapter)| async move {
            let status = with_timeout(timeout, adapter.refresh_status()).await;
            (server.id, status)
        }))
        .await;

        let mut report = DiscoveryReport::default();
        for (id, status) in results {
            let status = match status {
                Ok(status) => {
                    report.refreshed += 1;
                    status
                }
                Err(e) => {
                    tracing::warn!("discovery could not refresh {}: {}", id, e);
                    report.failed.push(id.clone());
                    ServerStatus::down()
                }
            };
            // Removed concurrently: nothing to record.
            let _ = self.apply_status(&id, &status);
        }

        self.mark_discovered();
        tracing::debug!(
            "discovery refreshed {} servers, {} failed",
            report.refreshed,
            report.failed.len()
        );
        report
    }

    fn fire_leader_lost(&self, leader: &Server) {
        let hook = self.on_leader_lost.read().clone();
        if let Some(hook) = hook {
            hook(leader);
        }
    }
}
