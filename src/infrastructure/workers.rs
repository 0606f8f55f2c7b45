//! Keyed Background Workers
//!
//! One long-lived task per key (server id, proxy id). `sync` reconciles the
//! running set against the registry membership.

use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct KeyedWorkers {
    tasks: DashMap<String, JoinHandle<()>>,
}

impl KeyedWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a worker for each new key and abort workers whose key is gone.
    /// Returns (started, stopped).
    pub fn sync<F, Fut>(&self, keys: &[String], mut spawn: F) -> (usize, usize)
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();

        // Finished workers (e.g. their target was removed) are restarted on
        // demand below.
        self.tasks.retain(|_, handle| !handle.is_finished());

        let stale: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| !wanted.contains(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &stale {
            if let Some((_, handle)) = self.tasks.remove(key) {
                handle.abort();
            }
        }

        let mut started = 0;
        for key in keys {
            if !self.tasks.contains_key(key) {
                let handle = tokio::spawn(spawn(key.clone()));
                self.tasks.insert(key.clone(), handle);
                started += 1;
            }
        }

        (started, stale.len())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn abort_all(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }
}

impl Drop for KeyedWorkers {
    fn drop(&mut self) {
        self.abort_all();
    }
}
