use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Control API
    pub api_listen_addr: String,
    pub cluster_name: String,
    pub debug: bool,
    /// Comma list of `user=grant,grant` entries separated by ';'.
    /// Unset means every caller is allowed.
    pub grants: Option<String>,

    // Loops and timeouts
    pub monitor_interval_ms: u64,
    pub reconcile_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub failure_threshold: u32,
    pub mutation_wait_retries: u32,
    pub mutation_wait_tick_ms: u64,
    pub leader_serves_reads: bool,

    // Topology seeds
    pub seed_servers: Vec<String>,
    pub haproxy_host: Option<String>,
    pub haproxy_port: u16,
    pub haproxy_read_backend: String,
    pub haproxy_write_backend: String,
    /// Use in-process simulated servers and proxies
    pub simulate: bool,
    pub agent_port: u16,

    // Credentials
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub vault_mount: String,
    pub secrets: Vec<String>,

    // Provisioning
    pub start_command: String,
    pub stop_command: String,
    pub provision_timeout_secs: u64,
    pub start_wait_retries: u32,

    // Outputs
    pub checkpoint_path: String,
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_listen_addr: "0.0.0.0:8090".to_string(),
            cluster_name: "default".to_string(),
            debug: false,
            grants: None,
            monitor_interval_ms: 2000,
            reconcile_interval_ms: 2000,
            call_timeout_ms: 5000,
            failure_threshold: 3,
            mutation_wait_retries: 30,
            mutation_wait_tick_ms: 100,
            leader_serves_reads: false,
            seed_servers: Vec::new(),
            haproxy_host: None,
            haproxy_port: 1999,
            haproxy_read_backend: "service_read".to_string(),
            haproxy_write_backend: "service_write".to_string(),
            simulate: false,
            agent_port: 10001,
            vault_addr: None,
            vault_token: None,
            vault_mount: "secret".to_string(),
            secrets: vec![
                "db-servers-credential".to_string(),
                "replication-credential".to_string(),
            ],
            start_command: "steward-db start".to_string(),
            stop_command: "steward-db stop".to_string(),
            provision_timeout_secs: 120,
            start_wait_retries: 60,
            checkpoint_path: "steward-topology.json".to_string(),
            webhook_url: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.vault_addr.is_some() && self.vault_token.is_none() {
            anyhow::bail!("STEWARD_VAULT_ADDR is set but STEWARD_VAULT_TOKEN is missing");
        }
        if self.call_timeout_ms == 0 {
            anyhow::bail!("STEWARD_CALL_TIMEOUT_MS must be positive");
        }
        Ok(())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = Config::default();

    let api_listen_addr =
        std::env::var("STEWARD_API_LISTEN_ADDR").unwrap_or(defaults.api_listen_addr);
    let cluster_name = std::env::var("STEWARD_CLUSTER_NAME").unwrap_or(defaults.cluster_name);
    let debug = std::env::var("DEBUG").is_ok();
    let grants = std::env::var("STEWARD_GRANTS").ok();

    let monitor_interval_ms =
        env_parse("STEWARD_MONITOR_INTERVAL_MS", defaults.monitor_interval_ms);
    let reconcile_interval_ms =
        env_parse("STEWARD_RECONCILE_INTERVAL_MS", defaults.reconcile_interval_ms);
    let call_timeout_ms = env_parse("STEWARD_CALL_TIMEOUT_MS", defaults.call_timeout_ms);
    let failure_threshold = env_parse("STEWARD_FAILURE_THRESHOLD", defaults.failure_threshold);
    let mutation_wait_retries =
        env_parse("STEWARD_MUTATION_WAIT_RETRIES", defaults.mutation_wait_retries);
    let mutation_wait_tick_ms =
        env_parse("STEWARD_MUTATION_WAIT_TICK_MS", defaults.mutation_wait_tick_ms);
    let leader_serves_reads = env_flag("STEWARD_LEADER_SERVES_READS");

    let seed_servers = env_list("STEWARD_SERVERS").unwrap_or_default();
    let haproxy_host = std::env::var("STEWARD_HAPROXY_HOST").ok();
    let haproxy_port = env_parse("STEWARD_HAPROXY_PORT", defaults.haproxy_port);
    let haproxy_read_backend =
        std::env::var("STEWARD_HAPROXY_READ_BACKEND").unwrap_or(defaults.haproxy_read_backend);
    let haproxy_write_backend =
        std::env::var("STEWARD_HAPROXY_WRITE_BACKEND").unwrap_or(defaults.haproxy_write_backend);
    let simulate = env_flag("STEWARD_SIMULATE");
    let agent_port = env_parse("STEWARD_AGENT_PORT", defaults.agent_port);

    let vault_addr = std::env::var("STEWARD_VAULT_ADDR").ok();
    let vault_token = std::env::var("STEWARD_VAULT_TOKEN").ok();
    let vault_mount = std::env::var("STEWARD_VAULT_MOUNT").unwrap_or(defaults.vault_mount);
    let secrets = env_list("STEWARD_SECRETS").unwrap_or(defaults.secrets);

    let start_command = std::env::var("STEWARD_START_COMMAND").unwrap_or(defaults.start_command);
    let stop_command = std::env::var("STEWARD_STOP_COMMAND").unwrap_or(defaults.stop_command);
    let provision_timeout_secs =
        env_parse("STEWARD_PROVISION_TIMEOUT_SECS", defaults.provision_timeout_secs);
    let start_wait_retries = env_parse("STEWARD_START_WAIT_RETRIES", defaults.start_wait_retries);

    let checkpoint_path =
        std::env::var("STEWARD_CHECKPOINT_PATH").unwrap_or(defaults.checkpoint_path);
    let webhook_url = std::env::var("STEWARD_WEBHOOK_URL").ok();

    let cfg = Config {
        api_listen_addr,
        cluster_name,
        debug,
        grants,
        monitor_interval_ms,
        reconcile_interval_ms,
        call_timeout_ms,
        failure_threshold,
        mutation_wait_retries,
        mutation_wait_tick_ms,
        leader_serves_reads,
        seed_servers,
        haproxy_host,
        haproxy_port,
        haproxy_read_backend,
        haproxy_write_backend,
        simulate,
        agent_port,
        vault_addr,
        vault_token,
        vault_mount,
        secrets,
        start_command,
        stop_command,
        provision_timeout_secs,
        start_wait_retries,
        checkpoint_path,
        webhook_url,
    };
    cfg.validate()?;
    Ok(cfg)
}
