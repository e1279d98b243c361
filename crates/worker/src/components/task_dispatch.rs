use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use celery_domain::{decode_invocation, ResultBackend, TaskInvocation, TaskState, TransportMessage};
use celery_errors::{CeleryError, CeleryResult};
use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info, warn};

use super::active_tasks::{ActiveTaskSet, TaskOutcome};
use crate::registry::{HandlerRegistry, TaskHandler};

/// 把收到的消息解码并交给处理器执行
pub struct TaskDispatcher {
    registry: Arc<HandlerRegistry>,
    backend: Arc<dyn ResultBackend>,
    active: Arc<ActiveTaskSet>,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        backend: Arc<dyn ResultBackend>,
        active: Arc<ActiveTaskSet>,
    ) -> Self {
        Self {
            registry,
            backend,
            active,
        }
    }

    /// 解码并派生执行，不等待执行结束
    ///
    /// 只有解码失败和缺少处理器会返回错误；处理器本身的失败写入结果后端。
    pub fn dispatch(&self, message: TransportMessage) -> CeleryResult<()> {
        let invocation = decode_invocation(&message)?;
        let name = invocation.task_name().to_string();
        let Some(handler) = self.registry.get(&name) else {
            error!("缺少任务处理器: {}[{}]", name, invocation.task_id());
            return Err(CeleryError::handler_not_found(name));
        };

        let args = serde_json::Value::Array(invocation.args.clone());
        let kwargs = serde_json::Value::Object(invocation.kwargs.clone());
        info!(
            "收到任务 {}[{}] args={} kwargs={}",
            name,
            invocation.task_id(),
            args,
            kwargs
        );

        let task_id = invocation.task_id().to_string();
        let backend = Arc::clone(&self.backend);
        self.active
            .track(task_id, name, execute(handler, invocation, backend));
        Ok(())
    }
}

async fn execute(
    handler: Arc<dyn TaskHandler>,
    invocation: TaskInvocation,
    backend: Arc<dyn ResultBackend>,
) -> TaskOutcome {
    let TaskInvocation {
        headers,
        args,
        kwargs,
        ..
    } = invocation;
    let started = Instant::now();

    let result = match AssertUnwindSafe(handler.call(args, kwargs))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err("任务处理器panic".to_string()),
    };
    let elapsed = started.elapsed().as_secs_f64();

    let stored = match &result {
        Ok(value) => {
            info!(
                "任务 {}[{}] 执行成功，耗时 {:.3}s: {}",
                headers.task, headers.id, elapsed, value
            );
            backend
                .store_result(&headers.id, value.clone(), TaskState::Success)
                .await
        }
        Err(message) => {
            error!(
                "任务 {}[{}] 执行失败，耗时 {:.3}s: {}",
                headers.task, headers.id, elapsed, message
            );
            backend
                .store_result(&headers.id, Value::String(message.clone()), TaskState::Failure)
                .await
        }
    };
    if !stored {
        warn!("任务 {}[{}] 的结果未能写入结果后端", headers.task, headers.id);
    }

    TaskOutcome {
        task_id: headers.id,
        task_name: headers.task,
        result: result.map_err(CeleryError::HandlerExecution),
        stored,
    }
}
