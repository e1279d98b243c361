//! 基于lapin的RabbitMQ适配器

mod backend;
mod broker;
mod connection;
pub mod fields;

pub use backend::AmqpBackend;
pub use broker::AmqpBroker;
pub use connection::{AmqpConnection, ConnectionState};
