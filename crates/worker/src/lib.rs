pub mod components;
pub mod registry;
pub mod service;

pub use components::{ActiveTaskSet, TaskDispatcher, TaskOutcome};
pub use registry::{handler_fn, sync_handler, HandlerRegistry, TaskHandler};
pub use service::{Worker, WorkerBuilder, DEFAULT_QUEUE};
