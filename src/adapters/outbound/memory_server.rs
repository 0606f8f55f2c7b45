//! In-Memory Server Adapter
//!
//! Simulated database server used by the local demo mode and the tests.
//! Status is set from outside; commands are recorded so callers can assert
//! on them. Failures can be injected per operation.

use crate::domain::entities::ServerStatus;
use crate::domain::errors::AdapterError;
use crate::domain::ports::ServerAdapter;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct MemoryServerAdapter {
    address: String,
    status: RwLock<ServerStatus>,
    passwords: DashMap<String, String>,
    restart_flag: AtomicBool,
    statements: Mutex<Vec<String>>,
    connects: AtomicU64,
    fail_refresh: AtomicBool,
    fail_credentials: AtomicBool,
    /// Statements containing one of these are refused as read-only variables
    static_variables: Mutex<Vec<String>>,
}

impl MemoryServerAdapter {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: RwLock::new(ServerStatus::down()),
            passwords: DashMap::new(),
            restart_flag: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            connects: AtomicU64::new(0),
            fail_refresh: AtomicBool::new(false),
            fail_credentials: AtomicBool::new(false),
            static_variables: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: ServerStatus) {
        *self.status.write() = status;
    }

    pub fn password(&self, user: &str) -> Option<String> {
        self.passwords.get(user).map(|p| p.value().clone())
    }

    pub fn restart_flag(&self) -> bool {
        self.restart_flag.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make `refresh_status` fail until reset.
    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Refuse any statement mentioning `variable`, the way a server refuses
    /// to change a variable that is only read at startup.
    pub fn static_variable(&self, variable: impl Into<String>) {
        self.static_variables.lock().push(variable.into());
    }

    /// Make `set_credential` fail until reset.
    pub fn fail_credentials(&self, fail: bool) {
        self.fail_credentials.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerAdapter for MemoryServerAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh_status(&self) -> Result<ServerStatus, AdapterError> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection(format!(
                "{} refused the connection",
                self.address
            )));
        }
        Ok(self.status.read().clone())
    }

    async fn set_credential(&self, user: &str, password: &str) -> Result<(), AdapterError> {
        if self.fail_credentials.load(Ordering::SeqCst) {
            return Err(AdapterError::Rejected(format!(
                "ALTER USER {} failed on {}",
                user, self.address
            )));
        }
        self.passwords.insert(user.to_string(), password.to_string());
        Ok(())
    }

    async fn set_restart_flag(&self, required: bool) -> Result<(), AdapterError> {
        self.restart_flag.store(required, Ordering::SeqCst);
        Ok(())
    }

    async fn run_sql(&self, statement: &str) -> Result<(), AdapterError> {
        let refused = self
            .static_variables
            .lock()
            .iter()
            .find(|v| statement.contains(v.as_str()))
            .cloned();
        if let Some(variable) = refused {
            return Err(AdapterError::Rejected(format!(
                "variable {} is read only on {}",
                variable, self.address
            )));
        }
        self.statements.lock().push(statement.to_string());
        Ok(())
    }
}
