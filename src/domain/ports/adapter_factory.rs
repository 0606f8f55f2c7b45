//! Adapter Factory Port
//!
//! Builds the I/O handles the registry attaches to each server and proxy.

use super::{ProxyAdapter, ServerAdapter};
use crate::domain::entities::{Proxy, Server};
use crate::domain::errors::ClusterError;
use std::sync::Arc;

pub trait AdapterFactory: Send + Sync {
    fn server_adapter(&self, server: &Server) -> Result<Arc<dyn ServerAdapter>, ClusterError>;

    /// Fails with `UnsupportedProxy` when no adapter exists for the
    /// proxy's technology.
    fn proxy_adapter(&self, proxy: &Proxy) -> Result<Arc<dyn ProxyAdapter>, ClusterError>;
}
