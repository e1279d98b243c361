use std::future::Future;
use std::sync::Arc;

use celery_domain::{Broker, MessageCallback, ResultBackend, Subscription, TransportMessage};
use celery_errors::{CeleryError, CeleryResult};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::components::{ActiveTaskSet, TaskDispatcher, TaskOutcome};
use crate::registry::{HandlerRegistry, TaskHandler};

/// 默认消费队列
pub const DEFAULT_QUEUE: &str = "celery";

/// Celery Worker
///
/// 从队列消费任务消息，派发给已注册的处理器并把结果写入结果后端。
/// 每条消息独立执行，Worker本身不限制并发。
pub struct Worker {
    queue: String,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn ResultBackend>,
    registry: Arc<HandlerRegistry>,
    active: Arc<ActiveTaskSet>,
    subscription: Mutex<Option<Subscription>>,
}

/// Worker构建器
pub struct WorkerBuilder {
    broker: Arc<dyn Broker>,
    backend: Arc<dyn ResultBackend>,
    queue: String,
    handlers: Vec<(String, Arc<dyn TaskHandler>)>,
}

impl WorkerBuilder {
    pub fn new(broker: Arc<dyn Broker>, backend: Arc<dyn ResultBackend>) -> Self {
        Self {
            broker,
            backend,
            queue: DEFAULT_QUEUE.to_string(),
            handlers: Vec::new(),
        }
    }

    /// 设置消费队列
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// 添加任务处理器
    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    /// 构建Worker，重复的任务名返回错误
    pub fn build(self) -> CeleryResult<Worker> {
        let worker = Worker::new(self.broker, self.backend, self.queue);
        for (name, handler) in self.handlers {
            worker.register(name, handler)?;
        }
        Ok(worker)
    }
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        backend: Arc<dyn ResultBackend>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            backend,
            registry: Arc::new(HandlerRegistry::new()),
            active: Arc::new(ActiveTaskSet::new()),
            subscription: Mutex::new(None),
        }
    }

    pub fn builder(broker: Arc<dyn Broker>, backend: Arc<dyn ResultBackend>) -> WorkerBuilder {
        WorkerBuilder::new(broker, backend)
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 注册任务处理器；传入 `None` 或重复注册同名任务都会失败
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Into<Option<Arc<dyn TaskHandler>>>,
    ) -> CeleryResult<()> {
        self.registry.register(name, handler.into())
    }

    pub fn registered_tasks(&self) -> Vec<String> {
        self.registry.names()
    }

    /// 当前正在执行的任务数
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub async fn is_running(&self) -> bool {
        self.subscription
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    fn create_task_handler(&self) -> MessageCallback {
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            Arc::clone(&self.active),
        );
        Arc::new(move |message: TransportMessage| dispatcher.dispatch(message))
    }

    /// 等待代理和结果后端就绪后开始消费，失败时记录日志并返回错误
    pub async fn start(&self) -> CeleryResult<()> {
        let mut subscription = self.subscription.lock().await;
        if subscription.as_ref().is_some_and(|s| !s.is_finished()) {
            return Err(CeleryError::Internal("Worker已在运行".to_string()));
        }

        info!("已注册的任务: {:?}", self.registry.names());

        let result = async {
            self.broker.is_ready().await?;
            self.backend.is_ready().await?;
            self.broker
                .subscribe(&self.queue, self.create_task_handler())
                .await
        }
        .await;

        match result {
            Ok(sub) => {
                info!("Worker开始消费队列 {}", self.queue);
                *subscription = Some(sub);
                Ok(())
            }
            Err(e) => {
                error!("启动Worker失败: {}", e);
                Err(e)
            }
        }
    }

    /// 等待调用时刻正在执行的任务全部结束
    pub fn when_current_jobs_finished(
        &self,
    ) -> impl Future<Output = Vec<TaskOutcome>> + Send + 'static {
        self.active.when_current_finished()
    }

    /// 停止接收新消息，然后等待进行中的任务结束；可重复调用
    pub async fn stop(&self) -> Vec<TaskOutcome> {
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            info!(
                "停止消费队列 {}, 等待 {} 个进行中的任务",
                subscription.queue(),
                self.active.len()
            );
            subscription.cancel().await;
        }
        self.when_current_jobs_finished().await
    }

    /// 停止消费并断开代理与结果后端，不等待进行中的任务
    pub async fn disconnect(&self) -> CeleryResult<()> {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.cancel().await;
        }

        let broker = self.broker.disconnect().await;
        if let Err(e) = &broker {
            warn!("断开消息代理失败: {}", e);
        }
        let backend = self.backend.disconnect().await;
        if let Err(e) = &backend {
            warn!("断开结果后端失败: {}", e);
        }
        broker.and(backend)
    }
}
