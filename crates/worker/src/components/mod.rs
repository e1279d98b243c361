pub mod active_tasks;
pub mod task_dispatch;

pub use active_tasks::{ActiveTaskSet, TaskOutcome};
pub use task_dispatch::TaskDispatcher;
