//! Graceful Shutdown Handler
//!
//! Stops the background loops (server monitors, proxy reconcilers) and
//! lets in-flight cycles finish before the process exits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;

/// Shutdown coordinator for the background loops.
#[derive(Clone)]
pub struct ShutdownController {
    shutdown_initiated: Arc<AtomicBool>,
    /// Cycles currently running
    active_cycles: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    /// Notified when the last running cycle finishes after shutdown
    cycles_done: Arc<Notify>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            active_cycles: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            cycles_done: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to the shutdown signal. Loops select on it between cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    pub fn active_cycles(&self) -> usize {
        self.active_cycles.load(Ordering::SeqCst)
    }

    /// Mark a monitor or reconciliation cycle as running until the guard
    /// drops.
    pub fn cycle_guard(&self) -> CycleGuard {
        self.active_cycles.fetch_add(1, Ordering::SeqCst);
        CycleGuard {
            controller: self.clone(),
        }
    }

    fn cycle_ended(&self) {
        let prev = self.active_cycles.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutdown() {
            self.cycles_done.notify_waiters();
        }
    }

    /// Wait for running cycles to finish. Returns false on timeout.
    pub async fn wait_for_cycles(&self, timeout: Duration) -> bool {
        let done = self.cycles_done.notified();
        if self.active_cycles() == 0 {
            return true;
        }

        tokio::select! {
            _ = done => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "shutdown timeout: {} cycles still running",
                    self.active_cycles()
                );
                false
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CycleGuard {
    controller: ShutdownController,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.controller.cycle_ended();
    }
}

/// Resolves when SIGINT or SIGTERM arrives, then triggers shutdown.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    controller.shutdown();
}
