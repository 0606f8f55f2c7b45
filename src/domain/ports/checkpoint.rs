//! Checkpoint Port

use crate::domain::entities::ClusterTopology;
use crate::domain::errors::AdapterError;
use async_trait::async_trait;

/// Persists the topology after membership and credential changes.
#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn save(&self, topology: &ClusterTopology) -> Result<(), AdapterError>;
}
