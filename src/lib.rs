//! repl-steward Library
//!
//! This module exposes the control plane components for use in integration
//! tests and as a library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{
    ClusterService, ReconciliationEngine, RotationCoordinator, TopologyRegistry,
};
pub use config::load_config;
pub use domain::entities::{ClusterTopology, Proxy, ProxySpec, Server, ServerSpec, ServerStatus};
pub use domain::errors::{AdapterError, ClusterError, ErrorKind};
pub use domain::ports::{ProxyAdapter, SecretStore, ServerAdapter};
pub use domain::services::BackendPlanner;
