//! JSON File Checkpoint
//!
//! Persists the topology after every mutating command. The file is written
//! to a temporary sibling first and renamed, so a reader never sees a
//! partial document.

use crate::domain::entities::ClusterTopology;
use crate::domain::errors::AdapterError;
use crate::domain::ports::Checkpoint;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct JsonFileCheckpoint {
    path: PathBuf,
}

impl JsonFileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last saved topology, if any.
    pub async fn load(&self) -> Result<Option<ClusterTopology>, AdapterError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AdapterError::Protocol(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Checkpoint for JsonFileCheckpoint {
    async fn save(&self, topology: &ClusterTopology) -> Result<(), AdapterError> {
        let document = serde_json::to_vec_pretty(topology)
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(
            "checkpoint v{} written to {}",
            topology.version,
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::entities::{Server, ServerSpec};

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = JsonFileCheckpoint::new(dir.path().join("topology.json"));

        let mut topology = ClusterTopology::default();
        let server = Server::from_spec(ServerSpec::new("10.0.0.1", 3306));
        topology.servers.push(server.clone());
        topology.version = 3;

        checkpoint.save(&topology).await.unwrap();
        let loaded = checkpoint.load().await.unwrap().unwrap();

        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.server(&server.id).unwrap().address(), "10.0.0.1:3306");
        assert!(!dir.path().join("topology.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = JsonFileCheckpoint::new(dir.path().join("absent.json"));
        assert!(checkpoint.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileCheckpoint::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AdapterError::Protocol(_)));
    }
}
