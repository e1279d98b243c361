use async_trait::async_trait;
use celery_domain::{ResultBackend, ResultRecord, TaskState};
use celery_errors::CeleryResult;
use serde_json::Value;
use tracing::trace;

/// 不记录结果的后端
#[derive(Debug, Default, Clone)]
pub struct DisabledBackend;

impl DisabledBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResultBackend for DisabledBackend {
    async fn is_ready(&self) -> CeleryResult<()> {
        Ok(())
    }

    async fn store_result(&self, task_id: &str, _result: Value, state: TaskState) -> bool {
        trace!("结果后端已禁用，忽略任务 {} 的结果: {}", task_id, state);
        true
    }

    async fn get_task_meta(&self, _task_id: &str) -> Option<ResultRecord> {
        None
    }

    async fn disconnect(&self) -> CeleryResult<()> {
        Ok(())
    }
}
