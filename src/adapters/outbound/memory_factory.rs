//! In-Memory Adapter Factory
//!
//! Hands out one simulated adapter per address so a test (or the demo
//! mode) can drive a server or proxy before and after it is registered.

use super::{MemoryProxyAdapter, MemoryServerAdapter};
use crate::domain::entities::{Proxy, Server};
use crate::domain::errors::ClusterError;
use crate::domain::ports::{AdapterFactory, ProxyAdapter, ServerAdapter};
use crate::domain::value_objects::ProxyTechnology;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

pub struct MemoryAdapterFactory {
    servers: DashMap<String, Arc<MemoryServerAdapter>>,
    proxies: DashMap<String, Arc<MemoryProxyAdapter>>,
    unsupported: DashSet<ProxyTechnology>,
}

impl MemoryAdapterFactory {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
            proxies: DashMap::new(),
            unsupported: DashSet::new(),
        }
    }

    /// Simulated server at `address` (host:port), created on first use.
    pub fn server(&self, address: &str) -> Arc<MemoryServerAdapter> {
        self.servers
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MemoryServerAdapter::new(address)))
            .clone()
    }

    /// Simulated proxy at `address` (host:port), created on first use.
    pub fn proxy(&self, address: &str) -> Arc<MemoryProxyAdapter> {
        self.proxies
            .entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryProxyAdapter::new(
                    crate::domain::entities::default_read_backend(),
                    crate::domain::entities::default_write_backend(),
                ))
            })
            .clone()
    }

    /// Refuse to build adapters for `technology`.
    pub fn without(&self, technology: ProxyTechnology) {
        self.unsupported.insert(technology);
    }
}

impl Default for MemoryAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for MemoryAdapterFactory {
    fn server_adapter(&self, server: &Server) -> Result<Arc<dyn ServerAdapter>, ClusterError> {
        Ok(self.server(&server.address()))
    }

    fn proxy_adapter(&self, proxy: &Proxy) -> Result<Arc<dyn ProxyAdapter>, ClusterError> {
        if self.unsupported.contains(&proxy.technology) {
            return Err(ClusterError::UnsupportedProxy {
                technology: proxy.technology.to_string(),
            });
        }
        let adapter = self
            .proxies
            .entry(proxy.address())
            .or_insert_with(|| {
                Arc::new(MemoryProxyAdapter::new(
                    proxy.read_backend.clone(),
                    proxy.write_backend.clone(),
                ))
            })
            .clone();
        Ok(adapter)
    }
}
