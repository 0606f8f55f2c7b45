mod adapter_factory;
mod authorizer;
mod checkpoint;
mod notifier;
mod proxy_adapter;
mod remote_actuator;
mod secret_store;
mod server_adapter;

pub use adapter_factory::AdapterFactory;
pub use authorizer::{Action, Authorizer, Decision};
pub use checkpoint::Checkpoint;
pub use notifier::Notifier;
pub use proxy_adapter::ProxyAdapter;
pub use remote_actuator::RemoteActuator;
pub use secret_store::SecretStore;
pub use server_adapter::ServerAdapter;
