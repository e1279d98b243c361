//! Celery协议兼容的任务队列：Worker进程装配与内置示例任务

pub mod common;
pub mod shutdown;
pub mod tasks;

pub use common::{
    build_adapters, build_client, build_worker, init_logging, load_config, run_worker,
    start_worker, Adapters, StartupConfig,
};
pub use shutdown::ShutdownManager;
