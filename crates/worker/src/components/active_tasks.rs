use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use celery_errors::{CeleryError, CeleryResult};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::error;

/// 一次任务执行的结果，结果已尝试写入后端之后才产生
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub task_name: String,
    /// 处理器失败时为 `CeleryError::HandlerExecution`
    pub result: CeleryResult<Value>,
    /// 结果是否成功写入后端
    pub stored: bool,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

type SharedOutcome = Shared<BoxFuture<'static, TaskOutcome>>;

struct ActiveTask {
    task_id: String,
    done: SharedOutcome,
}

/// 正在执行的任务集合
///
/// 任务从开始执行到结果写入后端期间都在集合中，按内部序号索引。
#[derive(Default)]
pub struct ActiveTaskSet {
    next_key: AtomicU64,
    tasks: Mutex<HashMap<u64, ActiveTask>>,
}

impl ActiveTaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 派生执行 `execution` 并登记，执行结束后自动移除
    pub fn track<F>(
        self: &Arc<Self>,
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        execution: F,
    ) where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        let task_id = task_id.into();
        let task_name = task_name.into();
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);

        // 持锁期间派生并登记，执行结束时的移除一定发生在登记之后
        let mut tasks = self.lock();
        let set = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = execution.await;
            set.lock().remove(&key);
            outcome
        });

        let (id, name) = (task_id.clone(), task_name);
        let done = handle
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    error!("任务 {}[{}] 异常退出: {}", name, id, e);
                    TaskOutcome {
                        task_id: id,
                        task_name: name,
                        result: Err(CeleryError::handler_execution(e.to_string())),
                        stored: false,
                    }
                })
            })
            .boxed()
            .shared();
        tasks.insert(key, ActiveTask { task_id, done });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.lock().values().map(|t| t.task_id.clone()).collect()
    }

    /// 等待调用时刻已在集合中的任务全部结束，之后加入的任务不等待
    ///
    /// 快照在调用时立即获取，而不是在首次poll时。
    pub fn when_current_finished(&self) -> impl Future<Output = Vec<TaskOutcome>> + Send + 'static {
        let snapshot: Vec<SharedOutcome> = self.lock().values().map(|t| t.done.clone()).collect();
        join_all(snapshot)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ActiveTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
