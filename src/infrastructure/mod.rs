//! Infrastructure Layer
//!
//! Background loops and process lifecycle.

pub mod monitor;
pub mod shutdown;
pub mod workers;

pub use monitor::{CheckResult, MonitorConfig, ServerMonitor};
pub use shutdown::{shutdown_signal, CycleGuard, ShutdownController};
pub use workers::KeyedWorkers;
