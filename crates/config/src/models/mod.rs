pub mod app_config;
pub mod logging;
pub mod message_queue;
pub mod worker;

pub use app_config::*;
pub use logging::*;
pub use message_queue::*;
pub use worker::*;
