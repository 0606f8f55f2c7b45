//! Failover State Machine
//!
//! The cluster-wide gate that serializes membership and credential changes.
//! The state lives in a `tokio::sync::watch` channel so waiters can observe
//! transitions without polling the lock.

use crate::domain::errors::ClusterError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverState {
    #[default]
    Idle,
    FailoverInProgress,
}

pub struct FailoverStateMachine {
    state: watch::Sender<FailoverState>,
    entered: AtomicU64,
    exited: AtomicU64,
}

impl FailoverStateMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(FailoverState::Idle);
        Self {
            state,
            entered: AtomicU64::new(0),
            exited: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> FailoverState {
        *self.state.borrow()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state() == FailoverState::FailoverInProgress
    }

    /// Idle -> FailoverInProgress. Fails when the state is already set.
    pub fn set_failover_state(&self) -> Result<(), ClusterError> {
        let entered = self.state.send_if_modified(|state| {
            if *state == FailoverState::Idle {
                *state = FailoverState::FailoverInProgress;
                true
            } else {
                false
            }
        });

        if entered {
            self.entered.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("failover state set");
            Ok(())
        } else {
            Err(ClusterError::AlreadyInFailover)
        }
    }

    /// Back to Idle. Calling it while already idle is a no-op.
    pub fn remove_failover_state(&self) {
        let exited = self.state.send_if_modified(|state| {
            if *state == FailoverState::FailoverInProgress {
                *state = FailoverState::Idle;
                true
            } else {
                false
            }
        });

        if exited {
            self.exited.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("failover state removed");
        }
    }

    /// Enter the failover state; it is left when the guard drops.
    pub fn enter(self: &Arc<Self>) -> Result<FailoverGuard, ClusterError> {
        self.set_failover_state()?;
        Ok(FailoverGuard {
            machine: Arc::clone(self),
        })
    }

    /// Like `enter`, but polls at a fixed tick for up to `retries` attempts
    /// before giving up with `AlreadyInFailover`.
    pub async fn enter_with_retry(
        self: &Arc<Self>,
        retries: u32,
        tick: Duration,
    ) -> Result<FailoverGuard, ClusterError> {
        let mut ticker = tokio::time::interval(tick);
        // The first tick completes immediately.
        ticker.tick().await;

        for attempt in 0..=retries {
            match self.enter() {
                Ok(guard) => return Ok(guard),
                Err(ClusterError::AlreadyInFailover) if attempt < retries => {
                    tracing::debug!("waiting for failover to finish ({}/{})", attempt + 1, retries);
                    ticker.tick().await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ClusterError::AlreadyInFailover)
    }

    pub fn subscribe(&self) -> watch::Receiver<FailoverState> {
        self.state.subscribe()
    }

    /// Number of (entries, exits) since creation.
    pub fn transitions(&self) -> (u64, u64) {
        (
            self.entered.load(Ordering::SeqCst),
            self.exited.load(Ordering::SeqCst),
        )
    }
}

impl Default for FailoverStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the failover state for the operation that requested it.
pub struct FailoverGuard {
    machine: Arc<FailoverStateMachine>,
}

impl Drop for FailoverGuard {
    fn drop(&mut self) {
        self.machine.remove_failover_state();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_set_twice_fails() {
        let machine = FailoverStateMachine::new();
        machine.set_failover_state().unwrap();
        assert!(matches!(
            machine.set_failover_state(),
            Err(ClusterError::AlreadyInFailover)
        ));
        machine.remove_failover_state();
        machine.remove_failover_state();
        assert_eq!(machine.state(), FailoverState::Idle);
        assert_eq!(machine.transitions(), (1, 1));
    }

    #[test]
    fn test_guard_exits_on_drop() {
        let machine = Arc::new(FailoverStateMachine::new());
        {
            let _guard = machine.enter().unwrap();
            assert!(machine.is_in_progress());
            assert!(machine.enter().is_err());
        }
        assert!(!machine.is_in_progress());
        assert!(machine.enter().is_ok());
    }

    #[tokio::test]
    async fn test_enter_with_retry_waits_for_release() {
        let machine = Arc::new(FailoverStateMachine::new());
        let guard = machine.enter().unwrap();

        let m = machine.clone();
        let waiter = tokio::spawn(async move {
            m.enter_with_retry(50, Duration::from_millis(10))
                .await
                .map(|_| ())
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(machine.transitions(), (2, 2));
    }

    #[tokio::test]
    async fn test_enter_with_retry_gives_up() {
        let machine = Arc::new(FailoverStateMachine::new());
        let _guard = machine.enter().unwrap();

        let result = machine.enter_with_retry(2, Duration::from_millis(5)).await;
        assert!(matches!(result, Err(ClusterError::AlreadyInFailover)));
    }

    #[tokio::test]
    async fn test_subscribe_observes_transitions() {
        let machine = Arc::new(FailoverStateMachine::new());
        let mut rx = machine.subscribe();

        let guard = machine.enter().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), FailoverState::FailoverInProgress);

        drop(guard);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), FailoverState::Idle);
    }
}
