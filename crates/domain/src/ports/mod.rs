pub mod backend;
pub mod messaging;

pub use backend::{result_queue_name, ResultBackend};
pub use messaging::{Broker, MessageCallback, Subscription};
