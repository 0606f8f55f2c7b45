//! Domain Entities - Core business objects
//!
//! Servers, proxies and the topology snapshot that ties them together.
//! They have no I/O and contain only business logic.

use crate::domain::errors::ClusterError;
use crate::domain::value_objects::{
    BackendState, LeaderReadPolicy, ProxyTechnology, ReplicationPosition, ServerHealth, ServerRole,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Request to add a database server to the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Explicit id. Derived from host:port when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub host: String,
    pub port: u16,
    /// Name of the secret holding this server's monitoring credential
    #[serde(default = "default_server_credential")]
    pub credential: String,
    #[serde(default)]
    pub ignored: bool,
}

pub fn default_server_credential() -> String {
    "db-servers-credential".to_string()
}

impl ServerSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: None,
            host: host.into(),
            port,
            credential: default_server_credential(),
            ignored: false,
        }
    }

    /// Parse `host:port`. The port defaults to 3306 when omitted.
    pub fn parse(address: &str) -> Result<Self, ClusterError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ClusterError::Invalid {
                field: "address",
                reason: "empty address".to_string(),
            });
        }
        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| ClusterError::Invalid {
                    field: "port",
                    reason: format!("{:?} is not a port number", port),
                })?;
                if host.is_empty() {
                    return Err(ClusterError::Invalid {
                        field: "host",
                        reason: "empty host".to_string(),
                    });
                }
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(address, 3306)),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = credential.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Derive a server id from its address: `db` and the first 8 bytes of
/// SHA-256 over `host:port`. Ids are checkpointed, so this must not change
/// between builds.
pub fn server_id_for(host: &str, port: u16) -> String {
    let digest = Sha256::digest(format!("{}:{}", host, port).as_bytes());
    digest[..8].iter().fold(String::from("db"), |mut id, byte| {
        let _ = write!(id, "{:02x}", byte);
        id
    })
}

/// A monitored database server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub role: ServerRole,
    pub health: ServerHealth,
    pub position: ReplicationPosition,
    /// Name of the secret this server authenticates with
    pub credential: String,
    /// Excluded from automatic routing decisions
    pub is_ignored: bool,
    /// Authoritative maintenance flag
    pub maintenance: bool,
    /// A configuration change is waiting for a restart
    pub restart_required: bool,
    /// Engine version string as last reported
    pub version: String,
}

impl Server {
    pub fn from_spec(spec: ServerSpec) -> Self {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| server_id_for(&spec.host, spec.port));
        Self {
            id,
            host: spec.host,
            port: spec.port,
            role: ServerRole::Unknown,
            health: ServerHealth::Down,
            position: ReplicationPosition::Unknown,
            credential: spec.credential,
            is_ignored: spec.ignored,
            maintenance: false,
            restart_required: false,
            version: String::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Spec that re-registers this server with the same identity.
    pub fn to_spec(&self) -> ServerSpec {
        ServerSpec {
            id: Some(self.id.clone()),
            host: self.host.clone(),
            port: self.port,
            credential: self.credential.clone(),
            ignored: self.is_ignored,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == ServerRole::Leader
    }

    /// Apply a refreshed status reported by the server adapter.
    ///
    /// An unreachable server keeps its last known role and position.
    pub fn apply_status(&mut self, status: &ServerStatus) {
        if status.health.is_reachable() {
            self.role = status.role;
            self.position = status.position.clone();
        }
        self.health = if self.maintenance && status.health.is_reachable() {
            ServerHealth::Maintenance
        } else {
            status.health
        };
        if !status.version.is_empty() {
            self.version = status.version.clone();
        }
    }
}

/// Status snapshot returned by one refresh of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub role: ServerRole,
    pub health: ServerHealth,
    #[serde(default)]
    pub position: ReplicationPosition,
    #[serde(default)]
    pub version: String,
}

impl ServerStatus {
    pub fn new(role: ServerRole, health: ServerHealth) -> Self {
        Self {
            role,
            health,
            position: ReplicationPosition::Unknown,
            version: String::new(),
        }
    }

    pub fn leader() -> Self {
        Self::new(ServerRole::Leader, ServerHealth::Up)
    }

    pub fn replica() -> Self {
        Self::new(ServerRole::Replica, ServerHealth::Up)
    }

    pub fn down() -> Self {
        Self::new(ServerRole::Unknown, ServerHealth::Down)
    }
}

/// Request to add a proxy to the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySpec {
    #[serde(default)]
    pub id: Option<String>,
    pub technology: ProxyTechnology,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_read_backend")]
    pub read_backend: String,
    #[serde(default = "default_write_backend")]
    pub write_backend: String,
    /// Secret holding the proxy's own admin credential
    #[serde(default)]
    pub credential: Option<String>,
    /// Secret holding the credential the proxy uses to monitor backends
    #[serde(default)]
    pub monitor_credential: Option<String>,
}

pub fn default_read_backend() -> String {
    "service_read".to_string()
}

pub fn default_write_backend() -> String {
    "service_write".to_string()
}

impl ProxySpec {
    pub fn new(technology: ProxyTechnology, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: None,
            technology,
            host: host.into(),
            port,
            read_backend: default_read_backend(),
            write_backend: default_write_backend(),
            credential: None,
            monitor_credential: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_monitor_credential(mut self, credential: impl Into<String>) -> Self {
        self.monitor_credential = Some(credential.into());
        self
    }

    /// Identity used for duplicate detection within one technology.
    pub fn identity(&self) -> String {
        if self.technology.identifies_by_port() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.host.clone()
        }
    }
}

/// A traffic-routing proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    pub technology: ProxyTechnology,
    pub host: String,
    pub port: u16,
    pub read_backend: String,
    pub write_backend: String,
    pub credential: Option<String>,
    pub monitor_credential: Option<String>,
    /// Backend table as last read from the proxy
    pub observed: BackendTable,
    pub version: String,
}

impl Proxy {
    pub fn from_spec(spec: ProxySpec) -> Self {
        let id = spec.id.clone().unwrap_or_else(|| {
            format!("{}-{}-{}", spec.technology.as_str(), spec.host, spec.port)
        });
        Self {
            id,
            technology: spec.technology,
            host: spec.host,
            port: spec.port,
            read_backend: spec.read_backend,
            write_backend: spec.write_backend,
            credential: spec.credential,
            monitor_credential: spec.monitor_credential,
            observed: BackendTable::default(),
            version: String::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn identity(&self) -> String {
        if self.technology.identifies_by_port() {
            self.address()
        } else {
            self.host.clone()
        }
    }

    pub fn to_spec(&self) -> ProxySpec {
        ProxySpec {
            id: Some(self.id.clone()),
            technology: self.technology,
            host: self.host.clone(),
            port: self.port,
            read_backend: self.read_backend.clone(),
            write_backend: self.write_backend.clone(),
            credential: self.credential.clone(),
            monitor_credential: self.monitor_credential.clone(),
        }
    }
}

/// One server line of a proxy backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Name of the server inside the proxy (the command target)
    pub name: String,
    /// host:port the proxy routes to
    pub address: String,
    pub state: BackendState,
}

impl BackendEntry {
    pub fn new(name: impl Into<String>, address: impl Into<String>, state: BackendState) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            state,
        }
    }
}

/// Backend table reported by a proxy, split by write and read backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTable {
    pub write: Vec<BackendEntry>,
    pub read: Vec<BackendEntry>,
}

impl BackendTable {
    pub fn read_entry(&self, name: &str) -> Option<&BackendEntry> {
        self.read.iter().find(|e| e.name == name)
    }

    pub fn write_entry_for(&self, address: &str) -> Option<&BackendEntry> {
        self.write.iter().find(|e| e.address == address)
    }

    pub fn is_empty(&self) -> bool {
        self.write.is_empty() && self.read.is_empty()
    }
}

/// Immutable, consistent copy of the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub servers: Vec<Server>,
    pub proxies: Vec<Proxy>,
    /// Id of the current leader
    pub leader: Option<String>,
    /// Bumped on every membership or leader change
    pub version: u64,
    /// Topology version observed when the last discovery pass completed
    pub discovered_version: u64,
    pub read_policy: LeaderReadPolicy,
}

impl ClusterTopology {
    pub fn server(&self, id: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn server_by_address(&self, address: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.address() == address)
    }

    /// Resolve a proxy backend entry to a known server: by address first,
    /// then by name.
    pub fn server_for_entry(&self, entry: &BackendEntry) -> Option<&Server> {
        self.server_by_address(&entry.address)
            .or_else(|| self.server(&entry.name))
    }

    pub fn leader(&self) -> Option<&Server> {
        self.leader.as_deref().and_then(|id| self.server(id))
    }

    pub fn proxy(&self, id: &str) -> Option<&Proxy> {
        self.proxies.iter().find(|p| p.id == id)
    }

    /// Servers currently replicating from another server.
    pub fn replicas(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|s| s.role.is_replicating())
    }

    pub fn leader_count(&self) -> usize {
        self.servers.iter().filter(|s| s.is_leader()).count()
    }

    /// No membership or leader change happened since discovery last completed.
    pub fn is_discovery_current(&self) -> bool {
        self.discovered_version >= self.version
    }
}
