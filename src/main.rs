//! repl-steward - replica and proxy control plane
//!
//! This is the composition root that wires together all the components.

use repl_steward::adapters::inbound::ApiServer;
use repl_steward::adapters::outbound::{
    AllowAll, CommandActuator, GrantAuthorizer, JsonFileCheckpoint, LogNotifier,
    MemoryAdapterFactory, MemorySecretStore, NetworkAdapterFactory, VaultConfig,
    VaultSecretStore, WebhookNotifier,
};
use repl_steward::application::{
    ClusterService, CredentialCache, FailoverStateMachine, ProvisionConfig, Provisioner,
    ReconcileConfig, ReconciliationEngine, RegistryConfig, RotationConfig, RotationCoordinator,
    TopologyRegistry,
};
use repl_steward::config::{load_config, Config};
use repl_steward::domain::entities::{ProxySpec, Server, ServerSpec, ServerStatus};
use repl_steward::domain::ports::{AdapterFactory, Authorizer, Notifier, SecretStore};
use repl_steward::domain::value_objects::{LeaderReadPolicy, ProxyTechnology};
use repl_steward::infrastructure::{shutdown_signal, MonitorConfig, ServerMonitor, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting repl-steward cluster={} api={} simulate={}",
        cfg.cluster_name,
        cfg.api_listen_addr,
        cfg.simulate
    );

    let call_timeout = Duration::from_millis(cfg.call_timeout_ms);
    let http = reqwest::Client::builder().timeout(call_timeout).build()?;

    // ===== COMPOSITION ROOT =====

    // 1. Credentials
    let store: Arc<dyn SecretStore> = match (&cfg.vault_addr, &cfg.vault_token) {
        (Some(address), Some(token)) => {
            tracing::info!("secrets from vault {} (mount {})", address, cfg.vault_mount);
            Arc::new(VaultSecretStore::new(
                VaultConfig {
                    address: address.clone(),
                    token: token.clone(),
                    mount: cfg.vault_mount.clone(),
                },
                http.clone(),
            ))
        }
        _ => {
            tracing::warn!("no vault configured, secrets are kept in memory only");
            Arc::new(MemorySecretStore::new())
        }
    };
    let cache = Arc::new(CredentialCache::new());
    match cache.load_from(store.as_ref(), &cfg.secrets).await {
        Ok(loaded) => tracing::info!("{} of {} credentials loaded", loaded, cfg.secrets.len()),
        Err(e) => tracing::error!("failed to load credentials: {}", e),
    }

    // 2. Adapters to servers and proxies
    let simulation = cfg.simulate.then(|| Arc::new(MemoryAdapterFactory::new()));
    let factory: Arc<dyn AdapterFactory> = match &simulation {
        Some(memory) => {
            seed_simulation(memory, &cfg);
            memory.clone()
        }
        None => Arc::new(NetworkAdapterFactory::new(
            cfg.agent_port,
            call_timeout,
            cache.clone(),
        )?),
    };

    // 3. Application services
    let failover = Arc::new(FailoverStateMachine::new());
    let registry = Arc::new(TopologyRegistry::new(
        factory,
        failover,
        RegistryConfig {
            mutation_wait_retries: cfg.mutation_wait_retries,
            mutation_wait_tick: Duration::from_millis(cfg.mutation_wait_tick_ms),
            call_timeout,
            read_policy: LeaderReadPolicy::from_flag(cfg.leader_serves_reads),
        },
    ));
    let engine = Arc::new(ReconciliationEngine::new(
        registry.clone(),
        ReconcileConfig {
            interval: Duration::from_millis(cfg.reconcile_interval_ms),
            call_timeout,
        },
    ));

    // Losing the leader triggers a discovery pass, then a reconcile.
    let weak_registry = Arc::downgrade(&registry);
    let weak_engine = Arc::downgrade(&engine);
    registry.on_leader_lost(Arc::new(move |leader: &Server| {
        tracing::warn!("leader {} lost, re-running discovery", leader.id);
        if let (Some(registry), Some(engine)) = (weak_registry.upgrade(), weak_engine.upgrade()) {
            tokio::spawn(async move {
                registry.discover().await;
                engine.trigger();
            });
        }
    }));

    let notifier: Arc<dyn Notifier> = match &cfg.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            cfg.cluster_name.clone(),
            http.clone(),
        )),
        None => Arc::new(LogNotifier),
    };
    let rotation = Arc::new(RotationCoordinator::new(
        registry.clone(),
        store,
        cache,
        notifier.clone(),
        RotationConfig {
            call_timeout,
            ..Default::default()
        },
    ));
    let provisioner = Arc::new(Provisioner::new(
        registry.clone(),
        Arc::new(CommandActuator::new()),
        ProvisionConfig {
            start_command: cfg.start_command.clone(),
            stop_command: cfg.stop_command.clone(),
            action_timeout: Duration::from_secs(cfg.provision_timeout_secs),
            wait_retries: cfg.start_wait_retries,
            wait_tick: Duration::from_secs(1),
            call_timeout,
        },
    ));
    let authorizer: Arc<dyn Authorizer> = match &cfg.grants {
        Some(grants) => Arc::new(GrantAuthorizer::from_spec(grants)),
        None => {
            tracing::warn!("no grants configured, every caller is allowed");
            Arc::new(AllowAll)
        }
    };
    let checkpoint = Arc::new(JsonFileCheckpoint::new(&cfg.checkpoint_path));

    // 4. Initial topology: last checkpoint, then configured seeds
    restore_topology(&registry, &checkpoint, &cfg).await;

    let service = Arc::new(ClusterService::new(
        registry.clone(),
        engine.clone(),
        rotation,
        provisioner,
        authorizer,
        checkpoint,
        notifier,
    ));

    // 5. Background loops and the control API
    let shutdown = ShutdownController::new();
    let monitor = Arc::new(ServerMonitor::new(
        registry.clone(),
        engine.clone(),
        MonitorConfig {
            interval: Duration::from_millis(cfg.monitor_interval_ms),
            call_timeout,
            failure_threshold: cfg.failure_threshold,
        },
    ));
    let monitor_task = monitor.start(shutdown.clone());
    let engine_task = engine.start(shutdown.clone());

    let api = ApiServer::new(cfg.api_listen_addr.clone(), service);
    let result = api.run(shutdown_signal(shutdown.clone())).await;

    shutdown.shutdown();
    if !shutdown.wait_for_cycles(Duration::from_secs(10)).await {
        tracing::warn!("exiting with cycles still running");
    }
    let _ = tokio::join!(monitor_task, engine_task);
    tracing::info!("repl-steward stopped");

    result
}

/// Re-register what the last checkpoint held, then the configured seeds.
/// Entries present in both are only added once.
async fn restore_topology(
    registry: &TopologyRegistry,
    checkpoint: &JsonFileCheckpoint,
    cfg: &Config,
) {
    let mut servers: Vec<ServerSpec> = Vec::new();
    let mut proxies: Vec<ProxySpec> = Vec::new();

    match checkpoint.load().await {
        Ok(Some(saved)) => {
            tracing::info!(
                "restoring topology v{} from {}",
                saved.version,
                checkpoint.path().display()
            );
            servers.extend(saved.servers.iter().map(|s| s.to_spec()));
            proxies.extend(saved.proxies.iter().map(|p| p.to_spec()));
        }
        Ok(None) => {}
        Err(e) => tracing::error!("ignoring unreadable checkpoint: {}", e),
    }

    for address in &cfg.seed_servers {
        match ServerSpec::parse(address) {
            Ok(spec) => servers.push(spec),
            Err(e) => tracing::error!("ignoring seed server {}: {}", address, e),
        }
    }
    if let Some(host) = &cfg.haproxy_host {
        let mut spec = ProxySpec::new(ProxyTechnology::Haproxy, host.clone(), cfg.haproxy_port);
        spec.read_backend = cfg.haproxy_read_backend.clone();
        spec.write_backend = cfg.haproxy_write_backend.clone();
        proxies.push(spec);
    }

    for spec in servers {
        let address = spec.address();
        if registry.snapshot().server_by_address(&address).is_some() {
            continue;
        }
        if let Err(e) = registry.add_server(spec).await {
            tracing::error!("could not add server {}: {}", address, e);
        }
    }
    for spec in proxies {
        let identity = spec.identity();
        let technology = spec.technology;
        let known = registry
            .snapshot()
            .proxies
            .iter()
            .any(|p| p.technology == technology && p.identity() == identity);
        if known {
            continue;
        }
        if let Err(e) = registry.add_proxy(spec).await {
            tracing::error!("could not add {} proxy {}: {}", technology, identity, e);
        }
    }
}

/// Simulated cluster: the first seed is the leader, the others replicate
/// from it.
fn seed_simulation(memory: &MemoryAdapterFactory, cfg: &Config) {
    let seeds = cfg
        .seed_servers
        .iter()
        .filter_map(|address| ServerSpec::parse(address).ok());
    for (index, spec) in seeds.enumerate() {
        let status = if index == 0 {
            ServerStatus::leader()
        } else {
            ServerStatus::replica()
        };
        memory.server(&spec.address()).set_status(status);
    }
    if let Some(host) = &cfg.haproxy_host {
        memory.proxy(&format!("{}:{}", host, cfg.haproxy_port));
    }
}
