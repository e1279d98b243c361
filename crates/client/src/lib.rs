pub mod async_result;
pub mod client;

pub use async_result::{AsyncResult, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
pub use client::{Client, Task, TaskProtocol};
