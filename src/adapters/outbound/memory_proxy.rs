//! In-Memory Proxy Adapter
//!
//! Simulated proxy holding a backend table. Commands mutate the table the
//! same way a real proxy would, which makes convergence observable.

use crate::domain::entities::{BackendEntry, BackendTable};
use crate::domain::errors::AdapterError;
use crate::domain::ports::ProxyAdapter;
use crate::domain::services::ProxyCommand;
use crate::domain::value_objects::{BackendState, Credential, CredentialScope};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct MemoryProxyAdapter {
    read_backend: String,
    write_backend: String,
    table: RwLock<BackendTable>,
    commands: Mutex<Vec<ProxyCommand>>,
    credentials: DashMap<CredentialScope, Credential>,
    version: String,
    fail_reads: AtomicBool,
    fail_commands: AtomicBool,
    fail_credentials: AtomicBool,
}

impl MemoryProxyAdapter {
    pub fn new(read_backend: impl Into<String>, write_backend: impl Into<String>) -> Self {
        Self {
            read_backend: read_backend.into(),
            write_backend: write_backend.into(),
            table: RwLock::new(BackendTable::default()),
            commands: Mutex::new(Vec::new()),
            credentials: DashMap::new(),
            version: "memory-1.0".to_string(),
            fail_reads: AtomicBool::new(false),
            fail_commands: AtomicBool::new(false),
            fail_credentials: AtomicBool::new(false),
        }
    }

    pub fn set_table(&self, table: BackendTable) {
        *self.table.write() = table;
    }

    pub fn table(&self) -> BackendTable {
        self.table.read().clone()
    }

    /// State of `server` in the read backend.
    pub fn read_state(&self, server: &str) -> Option<BackendState> {
        self.table.read().read_entry(server).map(|e| e.state.clone())
    }

    /// Commands applied so far, in order.
    pub fn commands(&self) -> Vec<ProxyCommand> {
        self.commands.lock().clone()
    }

    pub fn credential(&self, scope: CredentialScope) -> Option<Credential> {
        self.credentials.get(&scope).map(|c| c.value().clone())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn fail_credentials(&self, fail: bool) {
        self.fail_credentials.store(fail, Ordering::SeqCst);
    }

    fn check_commands(&self) -> Result<(), AdapterError> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection("proxy unreachable".to_string()));
        }
        Ok(())
    }

    fn set_state(&self, server: &str, backend: &str, state: BackendState) -> Result<(), AdapterError> {
        self.check_commands()?;
        let mut table = self.table.write();
        let entries = if backend == self.read_backend {
            &mut table.read
        } else if backend == self.write_backend {
            &mut table.write
        } else {
            return Err(AdapterError::Rejected(format!("No such backend {}", backend)));
        };
        let entry = entries
            .iter_mut()
            .find(|e| e.name == server)
            .ok_or_else(|| AdapterError::Rejected(format!("No such server {}/{}", backend, server)))?;
        entry.state = state;
        Ok(())
    }
}

#[async_trait]
impl ProxyAdapter for MemoryProxyAdapter {
    async fn read_backend_state(&self) -> Result<BackendTable, AdapterError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AdapterError::Timeout(std::time::Duration::from_secs(1)));
        }
        Ok(self.table())
    }

    async fn set_leader(&self, host: &str, port: u16) -> Result<(), AdapterError> {
        self.check_commands()?;
        self.table.write().write = vec![BackendEntry::new(
            "leader",
            format!("{}:{}", host, port),
            BackendState::Up,
        )];
        self.commands.lock().push(ProxyCommand::SetLeader {
            host: host.to_string(),
            port,
        });
        Ok(())
    }

    async fn set_drain(&self, server: &str, backend: &str) -> Result<(), AdapterError> {
        self.set_state(server, backend, BackendState::Drain)?;
        self.commands.lock().push(ProxyCommand::SetDrain {
            server: server.to_string(),
            backend: backend.to_string(),
        });
        Ok(())
    }

    async fn set_ready(&self, server: &str, backend: &str) -> Result<(), AdapterError> {
        self.set_state(server, backend, BackendState::Up)?;
        self.commands.lock().push(ProxyCommand::SetReady {
            server: server.to_string(),
            backend: backend.to_string(),
        });
        Ok(())
    }

    async fn set_maintenance(&self, server: &str, backend: &str) -> Result<(), AdapterError> {
        self.set_state(server, backend, BackendState::Maint)?;
        self.commands.lock().push(ProxyCommand::SetMaintenance {
            server: server.to_string(),
            backend: backend.to_string(),
        });
        Ok(())
    }

    async fn get_version(&self) -> Result<String, AdapterError> {
        Ok(self.version.clone())
    }

    async fn rotate_credential(
        &self,
        scope: CredentialScope,
        user: &str,
        password: &str,
    ) -> Result<(), AdapterError> {
        if self.fail_credentials.load(Ordering::SeqCst) {
            return Err(AdapterError::Rejected("credential update refused".to_string()));
        }
        self.credentials.insert(scope, Credential::new(user, password));
        Ok(())
    }
}
