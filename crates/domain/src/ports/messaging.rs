use std::sync::Arc;

use async_trait::async_trait;
use celery_errors::CeleryResult;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::envelope::{MessageProperties, TransportMessage};

/// 每条投递消息的回调
///
/// 同步返回：`Err` 表示消息无法处理（毒消息、缺少处理器），由Broker拒绝且不重新入队；
/// `Ok` 表示已接手（任务执行已派生），由Broker确认。
pub type MessageCallback = Arc<dyn Fn(TransportMessage) -> CeleryResult<()> + Send + Sync>;

/// 消息代理接口
#[async_trait]
pub trait Broker: Send + Sync {
    /// 等待连接就绪并声明拓扑
    async fn is_ready(&self) -> CeleryResult<()>;

    /// 以JSON发布消息，`properties` 中已设置的字段覆盖默认投递属性
    async fn publish(
        &self,
        body: &Value,
        exchange: &str,
        routing_key: &str,
        headers: &Map<String, Value>,
        properties: &MessageProperties,
    ) -> CeleryResult<bool>;

    /// 声明队列并开始消费，返回可取消的订阅
    async fn subscribe(&self, queue: &str, callback: MessageCallback)
        -> CeleryResult<Subscription>;

    async fn disconnect(&self) -> CeleryResult<()>;
}

/// 正在运行的消费循环
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    consumer_tag: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// `handle` 对应的消费循环在 `shutdown_tx` 触发或被丢弃时退出
    pub fn new(
        queue: impl Into<String>,
        consumer_tag: impl Into<String>,
        shutdown_tx: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 停止接收新的投递并等待消费循环退出
    pub async fn cancel(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
