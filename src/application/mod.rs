//! Application Layer
//!
//! Use cases over the topology registry: membership, reconciliation,
//! credential rotation and provisioning.

pub mod cluster_service;
pub mod credentials;
pub mod failover;
pub mod provisioning;
pub mod reconciliation;
pub mod registry;
pub mod rotation;

pub use cluster_service::ClusterService;
pub use credentials::CredentialCache;
pub use failover::{FailoverGuard, FailoverState, FailoverStateMachine};
pub use provisioning::{ConfigOutcome, ProvisionConfig, Provisioner};
pub use reconciliation::{CycleReport, ReconcileConfig, ReconciliationEngine};
pub use registry::{DiscoveryReport, RegistryConfig, TopologyRegistry};
pub use rotation::{
    CredentialRole, RotationConfig, RotationCoordinator, RotationOutcome, RotationRequest,
};
