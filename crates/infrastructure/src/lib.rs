pub mod amqp;
pub mod disabled_backend;
pub mod factory;
pub mod in_memory_backend;
pub mod in_memory_queue;

pub use amqp::{AmqpBackend, AmqpBroker, AmqpConnection, ConnectionState};
pub use disabled_backend::DisabledBackend;
pub use factory::AdapterFactory;
pub use in_memory_backend::{InMemoryBackend, InMemoryBackendStats};
pub use in_memory_queue::{InMemoryBroker, InMemoryBrokerStats};
