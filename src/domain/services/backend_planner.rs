//! Backend Planner Service
//!
//! Pure domain logic deciding which commands bring a proxy's observed
//! backend table in line with the registry. No I/O: the reconciliation
//! engine executes the resulting plan.

use crate::domain::entities::{BackendEntry, BackendTable, ClusterTopology, Proxy, Server};
use crate::domain::value_objects::BackendState;
use serde::Serialize;

/// A single proxy management command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ProxyCommand {
    SetLeader { host: String, port: u16 },
    SetDrain { server: String, backend: String },
    SetReady { server: String, backend: String },
    SetMaintenance { server: String, backend: String },
}

impl ProxyCommand {
    /// Leader pinning depends on a stable leader and is held back during
    /// failover.
    pub fn is_leader_pin(&self) -> bool {
        matches!(self, Self::SetLeader { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::SetLeader { host, port } => format!("set-leader {}:{}", host, port),
            Self::SetDrain { server, backend } => format!("set-drain {}/{}", backend, server),
            Self::SetReady { server, backend } => format!("set-ready {}/{}", backend, server),
            Self::SetMaintenance { server, backend } => {
                format!("set-maintenance {}/{}", backend, server)
            }
        }
    }
}

/// Why part of the table was left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum PlanSkip {
    /// The registry has no leader; the write backend is not touched.
    NoLeader,
    /// The leader is missing from the proxy but discovery is behind the
    /// topology version, so the last-known leader is not trusted yet.
    DiscoveryBehind { leader: String },
    /// A read entry does not map to any known server.
    UnknownBackend { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendPlan {
    pub commands: Vec<ProxyCommand>,
    pub skipped: Vec<PlanSkip>,
}

impl BackendPlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Computes reconciliation plans.
///
/// The registry is the ground truth; the plan only ever moves the proxy
/// toward it.
pub struct BackendPlanner;

impl BackendPlanner {
    pub fn plan(topology: &ClusterTopology, proxy: &Proxy, observed: &BackendTable) -> BackendPlan {
        let mut plan = BackendPlan::default();

        Self::plan_write_backend(topology, observed, &mut plan);

        for entry in &observed.read {
            let Some(server) = topology.server_for_entry(entry) else {
                plan.skipped.push(PlanSkip::UnknownBackend {
                    name: entry.name.clone(),
                });
                continue;
            };
            if let Some(command) = Self::plan_read_entry(topology, proxy, server, entry) {
                plan.commands.push(command);
            }
        }

        plan
    }

    fn plan_write_backend(topology: &ClusterTopology, observed: &BackendTable, plan: &mut BackendPlan) {
        let Some(leader) = topology.leader() else {
            plan.skipped.push(PlanSkip::NoLeader);
            return;
        };
        let leader_address = leader.address();
        let set_leader = ProxyCommand::SetLeader {
            host: leader.host.clone(),
            port: leader.port,
        };

        match observed.write_entry_for(&leader_address) {
            Some(entry) if entry.state == BackendState::Up => {}
            Some(_) => plan.commands.push(set_leader),
            None => {
                let known_elsewhere = observed.read.iter().any(|e| e.address == leader_address);
                if known_elsewhere {
                    plan.commands.push(set_leader);
                } else if topology.is_discovery_current() {
                    // Leader unknown to the proxy: force the last-known leader.
                    plan.commands.push(set_leader);
                } else {
                    plan.skipped.push(PlanSkip::DiscoveryBehind {
                        leader: leader.id.clone(),
                    });
                }
            }
        }
    }

    /// State the read backend should report for `server`, or None when the
    /// registry has no opinion (server down or not yet discovered).
    pub fn desired_read_state(topology: &ClusterTopology, server: &Server) -> Option<BackendState> {
        if server.maintenance {
            return Some(BackendState::Maint);
        }
        if server.is_leader() {
            return Some(if topology.read_policy.leader_serves_reads() {
                BackendState::Up
            } else {
                BackendState::Drain
            });
        }
        if server.is_ignored || server.health.is_replication_degraded() {
            return Some(BackendState::Drain);
        }
        if server.role.is_replicating() && server.health.is_replication_healthy() {
            return Some(BackendState::Up);
        }
        None
    }

    fn plan_read_entry(
        topology: &ClusterTopology,
        proxy: &Proxy,
        server: &Server,
        entry: &BackendEntry,
    ) -> Option<ProxyCommand> {
        // DOWN, NOLB and friends come from the proxy's own checks.
        if !entry.state.is_known() {
            return None;
        }
        let desired = match Self::desired_read_state(topology, server) {
            Some(desired) => desired,
            // Maintenance was lifted while the server has no healthy
            // opinion: take it out of MAINT without sending it reads.
            None if !server.maintenance && entry.state == BackendState::Maint => {
                BackendState::Drain
            }
            None => return None,
        };
        if desired == entry.state {
            return None;
        }

        let server = entry.name.clone();
        let backend = proxy.read_backend.clone();
        Some(match desired {
            BackendState::Up => ProxyCommand::SetReady { server, backend },
            BackendState::Drain => ProxyCommand::SetDrain { server, backend },
            BackendState::Maint => ProxyCommand::SetMaintenance { server, backend },
            BackendState::Unknown(_) => return None,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::entities::{ProxySpec, ServerSpec};
    use crate::domain::value_objects::{
        LeaderReadPolicy, ProxyTechnology, ServerHealth, ServerRole,
    };

    // ===== Test Helpers =====

    fn server(id: &str, last_octet: u8, role: ServerRole, health: ServerHealth) -> Server {
        let mut s = Server::from_spec(
            ServerSpec::new(format!("10.0.0.{}", last_octet), 3306).with_id(id),
        );
        s.role = role;
        s.health = health;
        s
    }

    fn topology(servers: Vec<Server>) -> ClusterTopology {
        let leader = servers.iter().find(|s| s.is_leader()).map(|s| s.id.clone());
        ClusterTopology {
            servers,
            leader,
            version: 2,
            discovered_version: 2,
            ..Default::default()
        }
    }

    fn proxy() -> Proxy {
        Proxy::from_spec(ProxySpec::new(ProxyTechnology::Haproxy, "10.0.1.1", 1999))
    }

    fn entry(name: &str, last_octet: u8, state: BackendState) -> BackendEntry {
        BackendEntry::new(name, format!("10.0.0.{}:3306", last_octet), state)
    }

    fn set_leader_to(last_octet: u8) -> ProxyCommand {
        ProxyCommand::SetLeader {
            host: format!("10.0.0.{}", last_octet),
            port: 3306,
        }
    }

    // ===== Write Backend Tests =====

    #[test]
    fn test_converged_table_plans_nothing() {
        let topo = topology(vec![
            server("a", 1, ServerRole::Leader, ServerHealth::Up),
            server("b", 2, ServerRole::Replica, ServerHealth::Up),
        ]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![
                entry("a", 1, BackendState::Drain),
                entry("b", 2, BackendState::Up),
            ],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert!(plan.is_empty(), "unexpected commands: {:?}", plan.commands);
    }

    #[test]
    fn test_wrong_leader_in_write_backend() {
        let topo = topology(vec![
            server("a", 1, ServerRole::Leader, ServerHealth::Up),
            server("b", 2, ServerRole::Replica, ServerHealth::Up),
        ]);
        let table = BackendTable {
            write: vec![entry("leader", 2, BackendState::Up)],
            read: vec![
                entry("a", 1, BackendState::Drain),
                entry("b", 2, BackendState::Up),
            ],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert_eq!(plan.commands, vec![set_leader_to(1)]);
    }

    #[test]
    fn test_leader_not_up_in_write_backend() {
        let topo = topology(vec![server("a", 1, ServerRole::Leader, ServerHealth::Up)]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Maint)],
            read: vec![],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert_eq!(plan.commands, vec![set_leader_to(1)]);
    }

    #[test]
    fn test_no_leader_leaves_write_backend() {
        let topo = topology(vec![server("b", 2, ServerRole::Replica, ServerHealth::Up)]);
        let table = BackendTable {
            write: vec![entry("leader", 9, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Up)],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert!(plan.commands.is_empty());
        assert_eq!(plan.skipped, vec![PlanSkip::NoLeader]);
    }

    #[test]
    fn test_missing_leader_forced_when_discovery_current() {
        let topo = topology(vec![server("a", 1, ServerRole::Leader, ServerHealth::Up)]);
        let plan = BackendPlanner::plan(&topo, &proxy(), &BackendTable::default());
        assert_eq!(plan.commands, vec![set_leader_to(1)]);
    }

    #[test]
    fn test_missing_leader_held_back_when_discovery_behind() {
        let mut topo = topology(vec![server("a", 1, ServerRole::Leader, ServerHealth::Up)]);
        topo.version = 5;
        topo.discovered_version = 4;

        let plan = BackendPlanner::plan(&topo, &proxy(), &BackendTable::default());
        assert!(plan.commands.is_empty());
        assert_eq!(
            plan.skipped,
            vec![PlanSkip::DiscoveryBehind {
                leader: "a".to_string()
            }]
        );
    }

    // ===== Read Backend Tests =====

    #[test]
    fn test_lagging_replica_is_drained() {
        let topo = topology(vec![
            server("a", 1, ServerRole::Leader, ServerHealth::Up),
            server("b", 2, ServerRole::Replica, ServerHealth::ReplicationLagging),
        ]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Up)],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert_eq!(
            plan.commands,
            vec![ProxyCommand::SetDrain {
                server: "b".to_string(),
                backend: "service_read".to_string()
            }]
        );
    }

    #[test]
    fn test_healthy_replica_is_readied() {
        let topo = topology(vec![
            server("a", 1, ServerRole::Leader, ServerHealth::Up),
            server("b", 2, ServerRole::Relay, ServerHealth::Up),
        ]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Drain)],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert_eq!(
            plan.commands,
            vec![ProxyCommand::SetReady {
                server: "b".to_string(),
                backend: "service_read".to_string()
            }]
        );
    }

    #[test]
    fn test_ignored_replica_stays_drained() {
        let mut b = server("b", 2, ServerRole::Replica, ServerHealth::Up);
        b.is_ignored = true;
        let topo = topology(vec![server("a", 1, ServerRole::Leader, ServerHealth::Up), b]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Drain)],
        };

        assert!(BackendPlanner::plan(&topo, &proxy(), &table).is_empty());
    }

    #[test]
    fn test_leader_read_policy() {
        let mut topo = topology(vec![server("a", 1, ServerRole::Leader, ServerHealth::Up)]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("a", 1, BackendState::Up)],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert!(matches!(plan.commands[..], [ProxyCommand::SetDrain { .. }]));

        topo.read_policy = LeaderReadPolicy::ServeReads;
        assert!(BackendPlanner::plan(&topo, &proxy(), &table).is_empty());

        let drained = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("a", 1, BackendState::Drain)],
        };
        let plan = BackendPlanner::plan(&topo, &proxy(), &drained);
        assert_eq!(
            plan.commands,
            vec![ProxyCommand::SetReady {
                server: "a".to_string(),
                backend: "service_read".to_string(),
            }]
        );
    }

    #[test]
    fn test_maintenance_flag_toggles() {
        let mut b = server("b", 2, ServerRole::Replica, ServerHealth::Up);
        b.maintenance = true;
        let mut topo = topology(vec![server("a", 1, ServerRole::Leader, ServerHealth::Up), b]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Up)],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert!(matches!(plan.commands[..], [ProxyCommand::SetMaintenance { .. }]));

        topo.servers[1].maintenance = false;
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Maint)],
        };
        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert!(matches!(plan.commands[..], [ProxyCommand::SetReady { .. }]));
    }

    #[test]
    fn test_unknown_states_and_servers_are_skipped() {
        let topo = topology(vec![
            server("a", 1, ServerRole::Leader, ServerHealth::Up),
            server("b", 2, ServerRole::Replica, ServerHealth::ReplicationBroken),
        ]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![
                entry("b", 2, BackendState::parse("DOWN")),
                entry("stranger", 77, BackendState::Up),
            ],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert!(plan.commands.is_empty());
        assert_eq!(
            plan.skipped,
            vec![PlanSkip::UnknownBackend {
                name: "stranger".to_string()
            }]
        );
    }

    #[test]
    fn test_down_replica_has_no_opinion() {
        let topo = topology(vec![server("c", 3, ServerRole::Unknown, ServerHealth::Down)]);
        let c = topo.server("c").unwrap();
        assert_eq!(BackendPlanner::desired_read_state(&topo, c), None);
    }

    #[test]
    fn test_stale_maint_cleared_on_down_replica() {
        let topo = topology(vec![
            server("a", 1, ServerRole::Leader, ServerHealth::Up),
            server("b", 2, ServerRole::Replica, ServerHealth::Down),
        ]);
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![
                entry("a", 1, BackendState::Drain),
                entry("b", 2, BackendState::Maint),
            ],
        };

        let plan = BackendPlanner::plan(&topo, &proxy(), &table);
        assert_eq!(
            plan.commands,
            vec![ProxyCommand::SetDrain {
                server: "b".to_string(),
                backend: "service_read".to_string(),
            }]
        );

        // Down and already drained: still nothing to say.
        let table = BackendTable {
            write: vec![entry("leader", 1, BackendState::Up)],
            read: vec![entry("b", 2, BackendState::Drain)],
        };
        assert!(BackendPlanner::plan(&topo, &proxy(), &table).is_empty());
    }
}
