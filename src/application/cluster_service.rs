//! Cluster Service - control plane use cases
//!
//! Entry point for remote callers. Every operation is authorized first, so
//! a denied caller has no effect at all. Successful changes are
//! checkpointed and wake the reconciliation loops.

use crate::application::provisioning::{ConfigOutcome, Provisioner};
use crate::application::reconciliation::{CycleReport, ReconciliationEngine};
use crate::application::registry::TopologyRegistry;
use crate::application::rotation::{RotationCoordinator, RotationOutcome, RotationRequest};
use crate::domain::entities::{ClusterTopology, ProxySpec, ServerSpec};
use crate::domain::errors::ClusterError;
use crate::domain::ports::{Action, Authorizer, Checkpoint, Notifier};
use crate::domain::value_objects::Severity;
use std::sync::Arc;

pub struct ClusterService {
    registry: Arc<TopologyRegistry>,
    engine: Arc<ReconciliationEngine>,
    rotation: Arc<RotationCoordinator>,
    provisioner: Arc<Provisioner>,
    authorizer: Arc<dyn Authorizer>,
    checkpoint: Arc<dyn Checkpoint>,
    notifier: Arc<dyn Notifier>,
}

impl ClusterService {
    pub fn new(
        registry: Arc<TopologyRegistry>,
        engine: Arc<ReconciliationEngine>,
        rotation: Arc<RotationCoordinator>,
        provisioner: Arc<Provisioner>,
        authorizer: Arc<dyn Authorizer>,
        checkpoint: Arc<dyn Checkpoint>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            engine,
            rotation,
            provisioner,
            authorizer,
            checkpoint,
            notifier,
        }
    }

    pub fn registry(&self) -> &Arc<TopologyRegistry> {
        &self.registry
    }

    /// Check `user` may perform `action`.
    pub fn authorize(&self, user: &str, action: Action) -> Result<(), ClusterError> {
        if self.authorizer.authorize(user, action).is_allowed() {
            Ok(())
        } else {
            tracing::warn!("denied {} to {}", action, user);
            Err(ClusterError::PermissionDenied {
                user: user.to_string(),
                action: action.as_str().to_string(),
            })
        }
    }

    pub fn topology(&self, user: &str) -> Result<ClusterTopology, ClusterError> {
        self.authorize(user, Action::ShowTopology)?;
        Ok(self.registry.snapshot())
    }

    // ===== Membership =====

    pub async fn add_server(&self, user: &str, spec: ServerSpec) -> Result<String, ClusterError> {
        self.authorize(user, Action::AddServer)?;
        let id = self.registry.add_server(spec).await?;
        self.changed("server.added", &format!("{} added server {}", user, id))
            .await;
        Ok(id)
    }

    pub async fn remove_server(&self, user: &str, id: &str) -> Result<(), ClusterError> {
        self.authorize(user, Action::RemoveServer)?;
        self.registry.remove_server(id).await?;
        self.changed("server.removed", &format!("{} removed server {}", user, id))
            .await;
        Ok(())
    }

    pub async fn set_maintenance(
        &self,
        user: &str,
        id: &str,
        enabled: bool,
    ) -> Result<(), ClusterError> {
        self.authorize(user, Action::ServerMaintenance)?;
        self.registry.set_maintenance(id, enabled)?;
        let state = if enabled { "on" } else { "off" };
        self.changed(
            "server.maintenance",
            &format!("{} turned maintenance {} for {}", user, state, id),
        )
        .await;
        Ok(())
    }

    pub async fn add_proxy(&self, user: &str, spec: ProxySpec) -> Result<String, ClusterError> {
        self.authorize(user, Action::AddProxy)?;
        let id = self.registry.add_proxy(spec).await?;
        self.changed("proxy.added", &format!("{} added proxy {}", user, id))
            .await;
        Ok(id)
    }

    pub async fn remove_proxy(&self, user: &str, id: &str) -> Result<(), ClusterError> {
        self.authorize(user, Action::RemoveProxy)?;
        self.registry.remove_proxy(id).await?;
        self.changed("proxy.removed", &format!("{} removed proxy {}", user, id))
            .await;
        Ok(())
    }

    // ===== Actions =====

    /// Run one reconciliation cycle on every proxy now.
    pub async fn reconcile(&self, user: &str) -> Result<Vec<CycleReport>, ClusterError> {
        self.authorize(user, Action::ReconcileProxies)?;
        let mut reports = Vec::new();
        for result in self.engine.reconcile_all().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!("reconcile requested by {}: {}", user, e),
            }
        }
        Ok(reports)
    }

    pub async fn rotate_credentials(
        &self,
        user: &str,
        request: &RotationRequest,
    ) -> Result<RotationOutcome, ClusterError> {
        self.authorize(user, Action::RotateCredentials)?;
        tracing::info!(
            "{} requested rotation of {} credential(s)",
            user,
            request.credentials.len()
        );
        let outcome = self.rotation.rotate(request).await?;
        if outcome.jobs.iter().any(|job| job.is_committed()) {
            self.save_checkpoint().await;
        }
        Ok(outcome)
    }

    pub async fn start_server(&self, user: &str, id: &str) -> Result<String, ClusterError> {
        self.authorize(user, Action::StartServer)?;
        let output = self.provisioner.start_server(id).await?;
        self.engine.trigger();
        Ok(output)
    }

    pub async fn stop_server(&self, user: &str, id: &str) -> Result<String, ClusterError> {
        self.authorize(user, Action::StopServer)?;
        let output = self.provisioner.stop_server(id).await?;
        self.engine.trigger();
        Ok(output)
    }

    pub async fn apply_config(
        &self,
        user: &str,
        id: &str,
        statements: &[String],
    ) -> Result<ConfigOutcome, ClusterError> {
        self.authorize(user, Action::ApplyConfig)?;
        let outcome = self.provisioner.apply_config(id, statements).await?;
        if outcome.restart_required {
            self.changed(
                "server.config",
                &format!(
                    "{} needs a restart for {} deferred statements",
                    id,
                    outcome.deferred.len()
                ),
            )
            .await;
        }
        Ok(outcome)
    }

    async fn changed(&self, event: &str, message: &str) {
        self.notifier.notify(event, Severity::Info, message);
        self.save_checkpoint().await;
        self.engine.trigger();
    }

    async fn save_checkpoint(&self) {
        let topology = self.registry.snapshot();
        if let Err(e) = self.checkpoint.save(&topology).await {
            tracing::error!("checkpoint of topology v{} failed: {}", topology.version, e);
        }
    }
}
