use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use celery_domain::{Broker, MessageCallback, MessageProperties, Subscription, TransportMessage};
use celery_errors::{CeleryError, CeleryResult};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

/// 内存消息代理
///
/// 每个队列一对无界mpsc通道，与RabbitMQ代理遵循相同的确认规则：
/// 内容校验失败或回调出错的消息被拒绝且不重新入队。适用于嵌入式部署和测试。
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
    stats: Arc<Counters>,
    closed: AtomicBool,
}

#[derive(Debug, Clone)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<TransportMessage>,
    /// 同一时刻只有一个消费循环持有接收端
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<TransportMessage>>>,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryBrokerStats {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> InMemoryBrokerStats {
        InMemoryBrokerStats {
            published: self.stats.published.load(Ordering::SeqCst),
            acked: self.stats.acked.load(Ordering::SeqCst),
            nacked: self.stats.nacked.load(Ordering::SeqCst),
        }
    }

    fn ensure_open(&self) -> CeleryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CeleryError::AdapterClosed("内存消息代理已关闭".to_string()));
        }
        Ok(())
    }

    async fn queue(&self, name: &str) -> QueueChannels {
        if let Some(channels) = self.queues.read().await.get(name) {
            return channels.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("创建内存队列: {}", name);
                let (sender, receiver) = mpsc::unbounded_channel();
                QueueChannels {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                }
            })
            .clone()
    }

    /// 直接投入一条原始消息，不做序列化和内容设置
    pub async fn publish_raw(&self, queue: &str, message: TransportMessage) -> CeleryResult<()> {
        self.ensure_open()?;
        self.queue(queue)
            .await
            .sender
            .send(message)
            .map_err(|e| CeleryError::transport(format!("投递到内存队列 {queue} 失败: {e}")))?;
        self.stats.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn is_ready(&self) -> CeleryResult<()> {
        self.ensure_open()
    }

    /// 交换机被忽略，按路由键直接投递到同名队列
    async fn publish(
        &self,
        body: &Value,
        exchange: &str,
        routing_key: &str,
        headers: &Map<String, Value>,
        properties: &MessageProperties,
    ) -> CeleryResult<bool> {
        let properties = MessageProperties {
            exchange: Some(exchange.to_string()),
            routing_key: Some(routing_key.to_string()),
            ..MessageProperties::json_persistent().merged_with(properties)
        };
        let message = TransportMessage::from_json(body, headers.clone(), properties)?;
        self.publish_raw(routing_key, message).await?;
        Ok(true)
    }

    async fn subscribe(&self, queue: &str, callback: MessageCallback) -> CeleryResult<Subscription> {
        self.ensure_open()?;
        let receiver = self.queue(queue).await.receiver;
        let stats = self.stats.clone();
        let consumer_tag = format!("memory-{}", uuid::Uuid::new_v4());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let tag = consumer_tag.clone();
        let handle = tokio::spawn(async move {
            let mut receiver = receiver.lock().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = receiver.recv() => match next {
                        Some(message) => deliver(message, &callback, &stats),
                        None => break,
                    }
                }
            }
            debug!("内存消费者 {} 已停止", tag);
        });

        info!("开始消费内存队列 {}", queue);
        Ok(Subscription::new(queue, consumer_tag, shutdown_tx, handle))
    }

    async fn disconnect(&self) -> CeleryResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn deliver(message: TransportMessage, callback: &MessageCallback, stats: &Counters) {
    match message.validate_content().and_then(|()| callback(message)) {
        Ok(()) => {
            stats.acked.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            warn!("丢弃消息: {}", e);
            stats.nacked.fetch_add(1, Ordering::SeqCst);
        }
    }
}
