mod agent_server;
mod authorizers;
mod command_actuator;
mod haproxy_runtime;
mod json_checkpoint;
mod memory_factory;
mod memory_proxy;
mod memory_secret_store;
mod memory_server;
mod network_factory;
mod notifiers;
mod vault_secret_store;

pub use agent_server::AgentServerAdapter;
pub use authorizers::{AllowAll, GrantAuthorizer};
pub use command_actuator::CommandActuator;
pub use haproxy_runtime::{parse_show_stat, HaproxyRuntimeAdapter, HaproxyRuntimeConfig};
pub use json_checkpoint::JsonFileCheckpoint;
pub use memory_factory::MemoryAdapterFactory;
pub use memory_proxy::MemoryProxyAdapter;
pub use memory_secret_store::MemorySecretStore;
pub use memory_server::MemoryServerAdapter;
pub use network_factory::NetworkAdapterFactory;
pub use notifiers::{LogNotifier, WebhookNotifier};
pub use vault_secret_store::{VaultConfig, VaultSecretStore};
