//! Error taxonomy
//!
//! `ClusterError` is what every mutating operation returns to its caller.
//! `AdapterError` is what the outbound adapters return for remote calls; it is
//! wrapped into `ClusterError::Adapter` together with the target it hit.

use std::time::Duration;

/// Coarse classification of a `ClusterError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Duplicate or missing target on add/remove. No side effect.
    Validation,
    /// Failover in progress or replication unhealthy. No side effect.
    Precondition,
    /// Caller is not allowed to run the action. No side effect.
    Permission,
    /// A remote call failed.
    Adapter,
    /// The remote actuator reported an unrecoverable failure.
    FatalProvisioning,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("server {address} already exists")]
    DuplicateServer { address: String },

    #[error("{technology} proxy {address} already exists")]
    DuplicateProxy { technology: String, address: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no adapter available for {technology} proxies")]
    UnsupportedProxy { technology: String },

    #[error("a failover is already in progress")]
    AlreadyInFailover,

    #[error("operation refused while a failover is in progress")]
    FailoverBusy,

    #[error("replication not healthy on {target}: {reason}")]
    ReplicationNotHealthy { target: String, reason: String },

    #[error("user {user} is not granted {action}")]
    PermissionDenied { user: String, action: String },

    #[error("secret store write for {secret} failed: {source}")]
    SecretStore {
        secret: String,
        #[source]
        source: AdapterError,
    },

    #[error("{target}: {source}")]
    Adapter {
        target: String,
        #[source]
        source: AdapterError,
    },

    #[error("provisioning failed on {target}: {reason}")]
    Provisioning { target: String, reason: String },
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateServer { .. }
            | Self::DuplicateProxy { .. }
            | Self::NotFound { .. }
            | Self::Invalid { .. }
            | Self::UnsupportedProxy { .. } => ErrorKind::Validation,
            Self::AlreadyInFailover | Self::FailoverBusy | Self::ReplicationNotHealthy { .. } => {
                ErrorKind::Precondition
            }
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::SecretStore { .. } | Self::Adapter { .. } => ErrorKind::Adapter,
            Self::Provisioning { .. } => ErrorKind::FatalProvisioning,
        }
    }

    /// Target id the error refers to, when there is one.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::DuplicateServer { address } | Self::DuplicateProxy { address, .. } => {
                Some(address)
            }
            Self::NotFound { id, .. } => Some(id),
            Self::ReplicationNotHealthy { target, .. }
            | Self::Adapter { target, .. }
            | Self::Provisioning { target, .. } => Some(target),
            Self::SecretStore { secret, .. } => Some(secret),
            _ => None,
        }
    }

    pub fn server_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "server",
            id: id.into(),
        }
    }

    pub fn proxy_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "proxy",
            id: id.into(),
        }
    }

    pub fn adapter(target: impl Into<String>, source: AdapterError) -> Self {
        Self::Adapter {
            target: target.into(),
            source,
        }
    }
}

/// Failure of a single remote call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("operation not supported by this adapter: {0}")]
    Unsupported(&'static str),
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::Connection(e.to_string())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        AdapterError::Http(e.to_string())
    }
}

/// Run a remote call under a timeout, folding the elapsed case into
/// `AdapterError::Timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, AdapterError>
where
    F: std::future::Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(timeout)),
    }
}
