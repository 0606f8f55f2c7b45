//! In-Memory Secret Store
//!
//! DashMap-backed secret store for local runs and tests.

use crate::domain::errors::AdapterError;
use crate::domain::ports::SecretStore;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct MemorySecretStore {
    secrets: DashMap<String, String>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
    refused: DashSet<String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self {
            secrets: DashMap::new(),
            writes: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
            refused: DashSet::new(),
        }
    }

    /// Seed a secret without counting it as a write.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }

    /// Successful writes since creation.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Refuse writes to one secret only.
    pub fn refuse(&self, name: impl Into<String>) {
        self.refused.insert(name.into());
    }

    fn check_write(&self, name: &str) -> Result<(), AdapterError> {
        if self.fail_writes.load(Ordering::SeqCst) || self.refused.contains(name) {
            return Err(AdapterError::Rejected(format!("write to {} refused", name)));
        }
        Ok(())
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>, AdapterError> {
        Ok(self.secrets.get(name).map(|v| v.value().clone()))
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), AdapterError> {
        self.check_write(name)?;
        self.secrets.insert(name.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rotate(&self, name: &str, new_value: &str) -> Result<Option<String>, AdapterError> {
        self.check_write(name)?;
        let previous = self.secrets.insert(name.to_string(), new_value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(previous)
    }
}
