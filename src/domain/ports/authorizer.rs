//! Authorizer Port
//!
//! Every externally triggered operation is checked against the caller's
//! grants before it runs. A denied call has no side effect.

use serde::{Deserialize, Serialize};

/// An operation a caller can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    ShowTopology,
    AddServer,
    RemoveServer,
    ServerMaintenance,
    AddProxy,
    RemoveProxy,
    ReconcileProxies,
    RotateCredentials,
    StartServer,
    StopServer,
    ApplyConfig,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::ShowTopology,
        Action::AddServer,
        Action::RemoveServer,
        Action::ServerMaintenance,
        Action::AddProxy,
        Action::RemoveProxy,
        Action::ReconcileProxies,
        Action::RotateCredentials,
        Action::StartServer,
        Action::StopServer,
        Action::ApplyConfig,
    ];

    /// Grant name, e.g. `server.add`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShowTopology => "topology.show",
            Self::AddServer => "server.add",
            Self::RemoveServer => "server.remove",
            Self::ServerMaintenance => "server.maintenance",
            Self::AddProxy => "proxy.add",
            Self::RemoveProxy => "proxy.remove",
            Self::ReconcileProxies => "proxy.reconcile",
            Self::RotateCredentials => "credentials.rotate",
            Self::StartServer => "server.start",
            Self::StopServer => "server.stop",
            Self::ApplyConfig => "server.config",
        }
    }

    pub fn parse(grant: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == grant)
    }

    /// Normalize an API request to the action it performs.
    ///
    /// Path segments after `/api/v1/` select the resource; ids are ignored.
    pub fn from_path(method: &str, path: &str) -> Option<Self> {
        let rest = path.trim_end_matches('/').strip_prefix("/api/v1/")?;
        let segments: Vec<&str> = rest.split('/').collect();
        let method = method.to_uppercase();

        match (method.as_str(), segments.as_slice()) {
            ("GET", ["topology"]) => Some(Self::ShowTopology),
            ("POST", ["servers"]) => Some(Self::AddServer),
            ("DELETE", ["servers", _]) => Some(Self::RemoveServer),
            ("POST", ["servers", _, "maintenance"]) => Some(Self::ServerMaintenance),
            ("POST", ["servers", _, "actions", "start"]) => Some(Self::StartServer),
            ("POST", ["servers", _, "actions", "stop"]) => Some(Self::StopServer),
            ("POST", ["servers", _, "actions", "apply-config"]) => Some(Self::ApplyConfig),
            ("POST", ["proxies"]) => Some(Self::AddProxy),
            ("DELETE", ["proxies", _]) => Some(Self::RemoveProxy),
            ("POST", ["actions", "reconcile"]) => Some(Self::ReconcileProxies),
            ("POST", ["actions", "rotate-credentials"]) => Some(Self::RotateCredentials),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub trait Authorizer: Send + Sync {
    fn authorize(&self, user: &str, action: Action) -> Decision;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_path() {
        assert_eq!(
            Action::from_path("POST", "/api/v1/servers"),
            Some(Action::AddServer)
        );
        assert_eq!(
            Action::from_path("delete", "/api/v1/servers/db1"),
            Some(Action::RemoveServer)
        );
        assert_eq!(
            Action::from_path("POST", "/api/v1/servers/db1/actions/stop"),
            Some(Action::StopServer)
        );
        assert_eq!(
            Action::from_path("POST", "/api/v1/servers/db1/actions/apply-config"),
            Some(Action::ApplyConfig)
        );
        assert_eq!(
            Action::from_path("POST", "/api/v1/actions/rotate-credentials/"),
            Some(Action::RotateCredentials)
        );
        assert_eq!(Action::from_path("GET", "/health"), None);
        assert_eq!(Action::from_path("PUT", "/api/v1/servers"), None);
    }

    #[test]
    fn test_action_grant_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::parse("cluster.destroy"), None);
    }
}
