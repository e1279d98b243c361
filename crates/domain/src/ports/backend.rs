use async_trait::async_trait;
use celery_errors::CeleryResult;
use serde_json::Value;

use crate::result::{ResultRecord, TaskState};

/// 结果后端接口
///
/// `store_result` 和 `get_task_meta` 不抛出传输错误：失败时记录日志并返回 `false`/`None`。
#[async_trait]
pub trait ResultBackend: Send + Sync {
    async fn is_ready(&self) -> CeleryResult<()>;

    /// 保存任务结果，返回是否成功
    async fn store_result(&self, task_id: &str, result: Value, state: TaskState) -> bool;

    /// 读取任务结果；读取是破坏性的，同一条结果最多被读到一次
    async fn get_task_meta(&self, task_id: &str) -> Option<ResultRecord>;

    async fn disconnect(&self) -> CeleryResult<()>;
}

/// 结果队列名：去掉任务id中的 `-`
pub fn result_queue_name(task_id: &str) -> String {
    task_id.replace('-', "")
}
