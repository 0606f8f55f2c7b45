//! Credential Rotation Coordinator
//!
//! Rotates database, replication and proxy credentials across the secret
//! store, every database server and every proxy tracking them.
//!
//! Commit order is fixed: the secret store first, then servers and proxies,
//! then the in-memory cache. Only the store write is a hard gate; a server
//! or proxy that refuses the new value is reported as pending and left for
//! the operator.

use crate::application::credentials::CredentialCache;
use crate::application::registry::TopologyRegistry;
use crate::domain::entities::ClusterTopology;
use crate::domain::errors::{with_timeout, AdapterError, ClusterError};
use crate::domain::ports::{Notifier, ProxyAdapter, SecretStore, ServerAdapter};
use crate::domain::value_objects::{Credential, CredentialScope, Severity};
use futures::future::join_all;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What a rotated credential is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialRole {
    /// Monitoring/admin account on the database servers
    Database,
    /// Account replicas use to pull from their source
    Replication,
    /// Account proxies use to check their backends
    ProxyMonitor,
    /// Account of the shard proxies
    ShardProxy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSpec {
    pub role: CredentialRole,
    /// Secret name in the store
    pub secret: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationRequest {
    pub credentials: Vec<CredentialSpec>,
}

impl RotationRequest {
    pub fn single(role: CredentialRole, secret: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            credentials: vec![CredentialSpec {
                role,
                secret: secret.into(),
                user: user.into(),
            }],
        }
    }

    pub fn with(mut self, role: CredentialRole, secret: impl Into<String>, user: impl Into<String>) -> Self {
        self.credentials.push(CredentialSpec {
            role,
            secret: secret.into(),
            user: user.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum RotationTarget {
    SecretStore(String),
    Server(String),
    Proxy(String),
}

impl std::fmt::Display for RotationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecretStore(name) => write!(f, "secret-store:{}", name),
            Self::Server(id) => write!(f, "server:{}", id),
            Self::Proxy(id) => write!(f, "proxy:{}", id),
        }
    }
}

impl From<RotationTarget> for String {
    fn from(target: RotationTarget) -> Self {
        target.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "kebab-case")]
pub enum TargetStatus {
    Pending,
    Applied,
    Failed(String),
    /// Nothing to do on this target
    Skipped,
}

/// Rotation of one logical credential.
#[derive(Debug, Clone, Serialize)]
pub struct RotationJob {
    pub id: Uuid,
    pub role: CredentialRole,
    pub secret: String,
    /// Value before the rotation, kept for manual compensation
    #[serde(serialize_with = "masked_option")]
    pub old: Option<Credential>,
    #[serde(serialize_with = "masked")]
    pub new: Credential,
    pub statuses: BTreeMap<RotationTarget, TargetStatus>,
}

impl RotationJob {
    fn new(spec: &CredentialSpec, new: Credential) -> Self {
        let mut statuses = BTreeMap::new();
        statuses.insert(
            RotationTarget::SecretStore(spec.secret.clone()),
            TargetStatus::Pending,
        );
        Self {
            id: Uuid::new_v4(),
            role: spec.role,
            secret: spec.secret.clone(),
            old: None,
            new,
            statuses,
        }
    }

    pub fn status(&self, target: &RotationTarget) -> Option<&TargetStatus> {
        self.statuses.get(target)
    }

    /// The new value reached the secret store.
    pub fn is_committed(&self) -> bool {
        self.status(&RotationTarget::SecretStore(self.secret.clone())) == Some(&TargetStatus::Applied)
    }

    fn set_status(&mut self, target: RotationTarget, status: TargetStatus) {
        self.statuses.insert(target, status);
    }
}

fn masked<S: Serializer>(credential: &Credential, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&credential.masked())
}

fn masked_option<S: Serializer>(credential: &Option<Credential>, s: S) -> Result<S::Ok, S::Error> {
    match credential {
        Some(c) => s.serialize_some(&c.masked()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    pub jobs: Vec<RotationJob>,
    /// Targets still holding the old value
    pub pending: Vec<RotationTarget>,
    /// Credentials whose store write failed; they were not rotated anywhere
    pub aborted: Vec<String>,
}

impl RotationOutcome {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.aborted.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub call_timeout: Duration,
    pub password_length: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            password_length: 32,
        }
    }
}

enum TargetAction {
    Server {
        adapter: Arc<dyn ServerAdapter>,
    },
    /// Every scope of one proxy that takes the credential, applied in order
    Proxy {
        adapter: Arc<dyn ProxyAdapter>,
        scopes: Vec<CredentialScope>,
    },
}

struct TargetOp {
    job: usize,
    target: RotationTarget,
    action: TargetAction,
    user: String,
    password: String,
}

pub struct RotationCoordinator {
    registry: Arc<TopologyRegistry>,
    store: Arc<dyn SecretStore>,
    cache: Arc<CredentialCache>,
    notifier: Arc<dyn Notifier>,
    config: RotationConfig,
}

impl RotationCoordinator {
    pub fn new(
        registry: Arc<TopologyRegistry>,
        store: Arc<dyn SecretStore>,
        cache: Arc<CredentialCache>,
        notifier: Arc<dyn Notifier>,
        config: RotationConfig,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            notifier,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Rotate every credential named in `request`.
    ///
    /// Refused with `FailoverBusy` while a failover runs and with
    /// `ReplicationNotHealthy` when a server is down or a replica is
    /// broken or lagging; in both cases nothing is generated or written.
    /// Fails with `SecretStore` when no credential reached the store.
    pub async fn rotate(&self, request: &RotationRequest) -> Result<RotationOutcome, ClusterError> {
        if request.credentials.is_empty() {
            return Err(ClusterError::Invalid {
                field: "credentials",
                reason: "nothing to rotate".to_string(),
            });
        }

        let _guard = self
            .registry
            .failover()
            .enter()
            .map_err(|_| ClusterError::FailoverBusy)?;

        let topology = self.registry.snapshot();
        check_replication(&topology)?;

        let passwords = self.generate_passwords(request);
        let mut jobs: Vec<RotationJob> = request
            .credentials
            .iter()
            .map(|spec| {
                let password = passwords.get(&spec.user).cloned().unwrap_or_default();
                RotationJob::new(spec, Credential::new(spec.user.clone(), password))
            })
            .collect();
        tracing::info!("credential rotation started for {} credentials", jobs.len());

        let mut store_errors = Vec::new();
        for job in jobs.iter_mut() {
            if let Err(e) = self.commit(job).await {
                store_errors.push((job.secret.clone(), e));
            }
        }
        if !jobs.iter().any(RotationJob::is_committed) {
            let (secret, source) = store_errors.into_iter().next().ok_or(ClusterError::Invalid {
                field: "credentials",
                reason: "nothing to rotate".to_string(),
            })?;
            tracing::error!("credential rotation cancelled, no secret could be written");
            return Err(ClusterError::SecretStore { secret, source });
        }

        let ops = self.plan_targets(&topology, &mut jobs);
        let timeout = self.config.call_timeout;
        let results = join_all(ops.into_iter().map(|op| async move {
            let result = match &op.action {
                TargetAction::Server { adapter } => {
                    with_timeout(timeout, adapter.set_credential(&op.user, &op.password)).await
                }
                TargetAction::Proxy { adapter, scopes } => {
                    rotate_proxy_scopes(adapter.as_ref(), scopes, &op.user, &op.password, timeout)
                        .await
                }
            };
            (op.job, op.target, result)
        }))
        .await;

        for (index, target, result) in results {
            let job = &mut jobs[index];
            let status = match result {
                Ok(()) => TargetStatus::Applied,
                Err(AdapterError::Unsupported(what)) => {
                    tracing::debug!("{}: {} not applicable ({})", job.secret, target, what);
                    TargetStatus::Skipped
                }
                Err(e) => {
                    tracing::error!("{}: could not apply new value on {}: {}", job.secret, target, e);
                    TargetStatus::Failed(e.to_string())
                }
            };
            job.set_status(target, status);
        }

        for job in jobs.iter().filter(|j| j.is_committed()) {
            self.cache.set(job.secret.clone(), job.new.clone());
        }

        let outcome = RotationOutcome {
            pending: jobs
                .iter()
                .flat_map(|job| {
                    job.statuses
                        .iter()
                        .filter(|(_, status)| matches!(status, TargetStatus::Failed(_)))
                        .filter(|(target, _)| !matches!(target, RotationTarget::SecretStore(_)))
                        .map(|(target, _)| target.clone())
                })
                .collect(),
            aborted: jobs
                .iter()
                .filter(|job| !job.is_committed())
                .map(|job| job.secret.clone())
                .collect(),
            jobs,
        };
        self.announce(&outcome);
        Ok(outcome)
    }

    /// One password per user: roles sharing a user share the value.
    fn generate_passwords(&self, request: &RotationRequest) -> HashMap<String, String> {
        let mut rng = rand::thread_rng();
        let mut passwords = HashMap::new();
        for spec in &request.credentials {
            passwords.entry(spec.user.clone()).or_insert_with(|| {
                (&mut rng)
                    .sample_iter(&Alphanumeric)
                    .take(self.config.password_length)
                    .map(char::from)
                    .collect::<String>()
            });
        }
        passwords
    }

    /// Write the new value to the secret store. On failure the previous
    /// value stays the current one everywhere.
    async fn commit(&self, job: &mut RotationJob) -> Result<(), AdapterError> {
        let target = RotationTarget::SecretStore(job.secret.clone());
        let result = with_timeout(
            self.config.call_timeout,
            self.store.rotate(&job.secret, &job.new.to_secret()),
        )
        .await;

        match result {
            Ok(previous) => {
                job.old = previous
                    .map(|v| Credential::from_secret(&v))
                    .or_else(|| self.cache.get(&job.secret));
                tracing::info!(
                    "secret {} written, new value {}",
                    job.secret,
                    job.new.masked()
                );
                job.set_status(target, TargetStatus::Applied);
                Ok(())
            }
            Err(e) => {
                job.old = self.cache.get(&job.secret);
                tracing::error!("rotation of {} cancelled, unable to write secret: {}", job.secret, e);
                job.set_status(target, TargetStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Targets of every committed job. A target receiving the same user and
    /// value from two jobs is only updated once.
    fn plan_targets(&self, topology: &ClusterTopology, jobs: &mut [RotationJob]) -> Vec<TargetOp> {
        let mut ops = Vec::new();
        let mut seen: HashSet<(RotationTarget, Option<CredentialScope>, String)> = HashSet::new();

        for (index, job) in jobs.iter_mut().enumerate() {
            if !job.is_committed() {
                continue;
            }

            for server in &topology.servers {
                let applies = match job.role {
                    CredentialRole::Replication => true,
                    _ => server.credential == job.secret,
                };
                if !applies {
                    continue;
                }
                let target = RotationTarget::Server(server.id.clone());
                if !seen.insert((target.clone(), None, job.new.user.clone())) {
                    job.set_status(target, TargetStatus::Skipped);
                    continue;
                }
                match self.registry.server_adapter(&server.id) {
                    Ok(adapter) => {
                        job.set_status(target.clone(), TargetStatus::Pending);
                        ops.push(TargetOp {
                            job: index,
                            target,
                            action: TargetAction::Server { adapter },
                            user: job.new.user.clone(),
                            password: job.new.password.clone(),
                        });
                    }
                    Err(e) => job.set_status(target, TargetStatus::Failed(e.to_string())),
                }
            }

            for proxy in &topology.proxies {
                let matching: Vec<CredentialScope> = [
                    (proxy.credential.as_deref(), CredentialScope::Admin),
                    (proxy.monitor_credential.as_deref(), CredentialScope::Monitor),
                ]
                .into_iter()
                .filter(|(secret, _)| *secret == Some(job.secret.as_str()))
                .map(|(_, scope)| scope)
                .collect();
                if matching.is_empty() {
                    continue;
                }

                let target = RotationTarget::Proxy(proxy.id.clone());
                let scopes: Vec<CredentialScope> = matching
                    .into_iter()
                    .filter(|scope| seen.insert((target.clone(), Some(*scope), job.new.user.clone())))
                    .collect();
                if scopes.is_empty() {
                    job.set_status(target, TargetStatus::Skipped);
                    continue;
                }
                match self.registry.proxy_adapter(&proxy.id) {
                    Ok(adapter) => {
                        job.set_status(target.clone(), TargetStatus::Pending);
                        ops.push(TargetOp {
                            job: index,
                            target,
                            action: TargetAction::Proxy { adapter, scopes },
                            user: job.new.user.clone(),
                            password: job.new.password.clone(),
                        });
                    }
                    Err(e) => job.set_status(target, TargetStatus::Failed(e.to_string())),
                }
            }
        }
        ops
    }

    fn announce(&self, outcome: &RotationOutcome) {
        let mut lines: Vec<String> = outcome
            .jobs
            .iter()
            .filter(|job| job.is_committed())
            .map(|job| {
                format!(
                    "{} rotated: {} -> {}",
                    job.secret,
                    job.old
                        .as_ref()
                        .map(Credential::masked)
                        .unwrap_or_else(|| "(none)".to_string()),
                    job.new.masked()
                )
            })
            .collect();
        if !outcome.aborted.is_empty() {
            lines.push(format!("not rotated: {}", outcome.aborted.join(", ")));
        }
        if !outcome.pending.is_empty() {
            let pending: Vec<String> = outcome.pending.iter().map(|t| t.to_string()).collect();
            lines.push(format!("still on the old value: {}", pending.join(", ")));
        }

        let severity = if outcome.is_complete() {
            Severity::Info
        } else {
            Severity::Warning
        };
        tracing::info!(
            "credential rotation finished: {} pending targets",
            outcome.pending.len()
        );
        self.notifier
            .notify("credentials.rotated", severity, &lines.join("\n"));
    }
}

fn check_replication(topology: &ClusterTopology) -> Result<(), ClusterError> {
    for server in &topology.servers {
        if !server.health.is_reachable() {
            return Err(ClusterError::ReplicationNotHealthy {
                target: server.id.clone(),
                reason: "server is down".to_string(),
            });
        }
        if server.role.is_replicating() && server.health.is_replication_degraded() {
            return Err(ClusterError::ReplicationNotHealthy {
                target: server.id.clone(),
                reason: format!("replication is {}", server.health),
            });
        }
    }
    Ok(())
}

/// Apply one value to each scope of a proxy. Any failure other than an
/// unsupported scope stops the rest; the proxy only counts as skipped when
/// no scope accepted the value.
async fn rotate_proxy_scopes(
    adapter: &dyn ProxyAdapter,
    scopes: &[CredentialScope],
    user: &str,
    password: &str,
    timeout: Duration,
) -> Result<(), AdapterError> {
    let mut applied = false;
    let mut unsupported = None;
    for scope in scopes {
        match with_timeout(timeout, adapter.rotate_credential(*scope, user, password)).await {
            Ok(()) => applied = true,
            Err(AdapterError::Unsupported(what)) => unsupported = Some(what),
            Err(e) => return Err(e),
        }
    }
    match unsupported {
        Some(what) if !applied => Err(AdapterError::Unsupported(what)),
        _ => Ok(()),
    }
}
