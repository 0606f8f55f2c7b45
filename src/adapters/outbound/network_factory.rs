//! Network Adapter Factory
//!
//! Builds the adapters used against real hosts: the management agent for
//! database servers and the runtime API for HAProxy. Other proxy
//! technologies are refused at registration.

use crate::adapters::outbound::agent_server::AgentServerAdapter;
use crate::adapters::outbound::haproxy_runtime::{HaproxyRuntimeAdapter, HaproxyRuntimeConfig};
use crate::application::credentials::CredentialCache;
use crate::domain::entities::{Proxy, Server};
use crate::domain::errors::ClusterError;
use crate::domain::ports::{AdapterFactory, ProxyAdapter, ServerAdapter};
use crate::domain::value_objects::ProxyTechnology;
use std::sync::Arc;
use std::time::Duration;

pub struct NetworkAdapterFactory {
    agent_port: u16,
    call_timeout: Duration,
    cache: Arc<CredentialCache>,
    client: reqwest::Client,
}

impl NetworkAdapterFactory {
    /// Fails when the HTTP client for the agents cannot be built.
    pub fn new(
        agent_port: u16,
        call_timeout: Duration,
        cache: Arc<CredentialCache>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(call_timeout).build()?;
        Ok(Self {
            agent_port,
            call_timeout,
            cache,
            client,
        })
    }
}

impl AdapterFactory for NetworkAdapterFactory {
    fn server_adapter(&self, server: &Server) -> Result<Arc<dyn ServerAdapter>, ClusterError> {
        Ok(Arc::new(AgentServerAdapter::new(
            format!("http://{}:{}", server.host, self.agent_port),
            server.credential.clone(),
            self.cache.clone(),
            self.client.clone(),
        )))
    }

    fn proxy_adapter(&self, proxy: &Proxy) -> Result<Arc<dyn ProxyAdapter>, ClusterError> {
        match proxy.technology {
            ProxyTechnology::Haproxy => Ok(Arc::new(HaproxyRuntimeAdapter::new(
                HaproxyRuntimeConfig {
                    host: proxy.host.clone(),
                    port: proxy.port,
                    read_backend: proxy.read_backend.clone(),
                    write_backend: proxy.write_backend.clone(),
                    timeout: self.call_timeout,
                },
            ))),
            other => Err(ClusterError::UnsupportedProxy {
                technology: other.as_str().to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::entities::{ProxySpec, ServerSpec};
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_only_haproxy_is_supported() {
        let factory =
            NetworkAdapterFactory::new(9100, Duration::from_secs(1), Arc::new(CredentialCache::new()))
                .unwrap();

        let haproxy = Proxy::from_spec(ProxySpec::new(ProxyTechnology::Haproxy, "10.0.0.9", 9999));
        assert!(factory.proxy_adapter(&haproxy).is_ok());

        let proxysql = Proxy::from_spec(ProxySpec::new(ProxyTechnology::ProxySql, "10.0.0.9", 6032));
        assert!(matches!(
            factory.proxy_adapter(&proxysql),
            Err(ClusterError::UnsupportedProxy { .. })
        ));
    }

    #[tokio::test]
    async fn test_agent_client_carries_call_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/ping"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let factory = NetworkAdapterFactory::new(
            mock_server.address().port(),
            Duration::from_millis(200),
            Arc::new(CredentialCache::new()),
        )
        .unwrap();
        let server = Server::from_spec(ServerSpec::new("127.0.0.1", 3306));
        let adapter = factory.server_adapter(&server).unwrap();

        let started = Instant::now();
        assert!(adapter.connect().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
