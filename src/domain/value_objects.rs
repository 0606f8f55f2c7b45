//! Value Objects - Immutable domain primitives
//!
//! Roles, health states and proxy-reported backend states are identified by
//! their value. They are cheap to clone and freely shared between the
//! registry snapshot and the components reading it.

use serde::{Deserialize, Serialize};

/// Replication role of a database server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ServerRole {
    /// Accepts writes (a.k.a. master/primary)
    Leader,
    /// Replicates from the leader
    Replica,
    /// Replica that also serves as a replication source for others
    Relay,
    /// Not yet discovered or demoted pending re-election
    #[default]
    Unknown,
}

impl ServerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Replica => "replica",
            Self::Relay => "relay",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the role replicates from another server.
    pub fn is_replicating(&self) -> bool {
        matches!(self, Self::Replica | Self::Relay)
    }
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health of a database server as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ServerHealth {
    Up,
    #[default]
    Down,
    Maintenance,
    ReplicationBroken,
    ReplicationLagging,
}

impl ServerHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Maintenance => "maintenance",
            Self::ReplicationBroken => "replication-broken",
            Self::ReplicationLagging => "replication-lagging",
        }
    }

    /// Replication is broken or behind; the server must not take reads.
    pub fn is_replication_degraded(&self) -> bool {
        matches!(self, Self::ReplicationBroken | Self::ReplicationLagging)
    }

    /// Server answers and replication (if any) is running in time.
    pub fn is_replication_healthy(&self) -> bool {
        matches!(self, Self::Up)
    }

    pub fn is_reachable(&self) -> bool {
        !matches!(self, Self::Down)
    }
}

impl std::fmt::Display for ServerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine-specific replication coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReplicationPosition {
    /// GTID set (MariaDB domain-server-sequence or MySQL uuid:interval)
    Gtid { set: String },
    /// Binary log file and byte offset
    File { file: String, offset: u64 },
    #[default]
    Unknown,
}

impl std::fmt::Display for ReplicationPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gtid { set } => write!(f, "gtid:{}", set),
            Self::File { file, offset } => write!(f, "{}:{}", file, offset),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Routing proxy technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyTechnology {
    Haproxy,
    ProxySql,
    MaxScale,
    ShardProxy,
}

impl ProxyTechnology {
    /// Parse a technology tag. Returns None for unknown tags.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "haproxy" => Some(Self::Haproxy),
            "proxysql" => Some(Self::ProxySql),
            "maxscale" => Some(Self::MaxScale),
            "shardproxy" | "shard-proxy" | "spider" => Some(Self::ShardProxy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Haproxy => "haproxy",
            Self::ProxySql => "proxysql",
            Self::MaxScale => "maxscale",
            Self::ShardProxy => "shardproxy",
        }
    }

    /// Shard proxies are identified by host:port, the others by host only.
    pub fn identifies_by_port(&self) -> bool {
        matches!(self, Self::ShardProxy)
    }
}

impl std::fmt::Display for ProxyTechnology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of a backend server as reported by a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendState {
    Up,
    Drain,
    Maint,
    /// Anything else the proxy reports (DOWN, NOLB, no check...)
    Unknown(String),
}

impl BackendState {
    /// Parse a proxy status column.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_uppercase().as_str() {
            "UP" | "OPEN" | "ONLINE" => Self::Up,
            "DRAIN" => Self::Drain,
            "MAINT" | "OFFLINE_SOFT" => Self::Maint,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Up => "UP",
            Self::Drain => "DRAIN",
            Self::Maint => "MAINT",
            Self::Unknown(s) => s.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the leader also serves the read backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderReadPolicy {
    ServeReads,
    #[default]
    WriteOnly,
}

impl LeaderReadPolicy {
    pub fn from_flag(serve_reads: bool) -> Self {
        if serve_reads {
            Self::ServeReads
        } else {
            Self::WriteOnly
        }
    }

    pub fn leader_serves_reads(&self) -> bool {
        matches!(self, Self::ServeReads)
    }
}

/// Which credential of a proxy a rotated value applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialScope {
    /// The proxy's own admin/user account
    Admin,
    /// The account the proxy uses to monitor database backends
    Monitor,
}

/// A user/password pair.
///
/// Stored in secret stores as `user:password`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Parse the `user:password` secret form. A value without a colon is a
    /// bare password with an empty user.
    pub fn from_secret(value: &str) -> Self {
        match value.split_once(':') {
            Some((user, password)) => Self::new(user, password),
            None => Self::new("", value),
        }
    }

    pub fn to_secret(&self) -> String {
        if self.user.is_empty() {
            self.password.clone()
        } else {
            format!("{}:{}", self.user, self.password)
        }
    }

    /// Masked form safe for logs and notifications.
    pub fn masked(&self) -> String {
        format!("{}:{}", self.user, mask_secret(&self.password))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &mask_secret(&self.password))
            .finish()
    }
}

/// Mask a secret, keeping only its first and last character.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=4 => "*".repeat(chars.len()),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    }
}

/// Severity of a notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Alert,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Alert => write!(f, "alert"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_backend_state_parse() {
        assert_eq!(BackendState::parse("UP"), BackendState::Up);
        assert_eq!(BackendState::parse(" drain "), BackendState::Drain);
        assert_eq!(BackendState::parse("MAINT"), BackendState::Maint);
        assert_eq!(
            BackendState::parse("DOWN"),
            BackendState::Unknown("DOWN".to_string())
        );
        assert!(!BackendState::parse("no check").is_known());
    }

    #[test]
    fn test_health_classification() {
        assert!(ServerHealth::ReplicationBroken.is_replication_degraded());
        assert!(ServerHealth::ReplicationLagging.is_replication_degraded());
        assert!(!ServerHealth::Up.is_replication_degraded());
        assert!(ServerHealth::Up.is_replication_healthy());
        assert!(!ServerHealth::Maintenance.is_replication_healthy());
        assert!(!ServerHealth::Down.is_reachable());
    }

    #[test]
    fn test_role_is_replicating() {
        assert!(ServerRole::Replica.is_replicating());
        assert!(ServerRole::Relay.is_replicating());
        assert!(!ServerRole::Leader.is_replicating());
        assert!(!ServerRole::Unknown.is_replicating());
    }

    #[test]
    fn test_proxy_technology_parse() {
        assert_eq!(ProxyTechnology::parse("HAProxy"), Some(ProxyTechnology::Haproxy));
        assert_eq!(ProxyTechnology::parse("spider"), Some(ProxyTechnology::ShardProxy));
        assert_eq!(ProxyTechnology::parse("nginx"), None);
        assert!(ProxyTechnology::ShardProxy.identifies_by_port());
        assert!(!ProxyTechnology::ProxySql.identifies_by_port());
    }

    #[test]
    fn test_credential_secret_form() {
        let cred = Credential::from_secret("repl:s3cr3t:with:colons");
        assert_eq!(cred.user, "repl");
        assert_eq!(cred.password, "s3cr3t:with:colons");
        assert_eq!(cred.to_secret(), "repl:s3cr3t:with:colons");

        let bare = Credential::from_secret("onlypassword");
        assert_eq!(bare.user, "");
        assert_eq!(bare.to_secret(), "onlypassword");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("password"), "p******d");
    }

    #[test]
    fn test_credential_debug_is_masked() {
        let cred = Credential::new("admin", "supersecret");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("s*********t"));
    }

    #[test]
    fn test_leader_read_policy_from_flag() {
        assert!(LeaderReadPolicy::from_flag(true).leader_serves_reads());
        assert!(!LeaderReadPolicy::from_flag(false).leader_serves_reads());
        assert_eq!(LeaderReadPolicy::default(), LeaderReadPolicy::WriteOnly);
    }
}
