use async_trait::async_trait;
use celery_config::BrokerConfig;
use celery_domain::{Broker, MessageCallback, MessageProperties, Subscription};
use celery_errors::{CeleryError, CeleryResult};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::*;
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, Consumer, ExchangeKind};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::connection::{AmqpConnection, ConnectionState};
use super::fields;

/// RabbitMQ消息代理
///
/// 通道处于发布确认模式；投递一律显式确认。
pub struct AmqpBroker {
    connection: AmqpConnection,
    config: BrokerConfig,
}

impl AmqpBroker {
    pub fn new(config: BrokerConfig) -> CeleryResult<Self> {
        let url = config.connection_url()?;
        Ok(Self {
            connection: AmqpConnection::new("broker", url, true),
            config,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// 声明持久、非自动删除、非排他的队列
    async fn declare_queue(&self, channel: &Channel, queue: &str) -> CeleryResult<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| CeleryError::transport(format!("声明队列 {queue} 失败: {e}")))?;

        debug!("队列 {} 声明成功", queue);
        Ok(())
    }

    async fn declare_topology(&self, channel: &Channel) -> CeleryResult<()> {
        let exchange = &self.config.exchange;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| CeleryError::transport(format!("声明交换机 {exchange} 失败: {e}")))?;

        let queue = &self.config.queue;
        self.declare_queue(channel, queue).await?;
        channel
            .queue_bind(
                queue,
                exchange,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                CeleryError::transport(format!("绑定队列 {queue} 到交换机 {exchange} 失败: {e}"))
            })?;

        info!("拓扑声明完成: 交换机 {}, 队列 {}", exchange, queue);
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn is_ready(&self) -> CeleryResult<()> {
        let channel = self.connection.channel().await?;
        self.declare_topology(&channel).await
    }

    async fn publish(
        &self,
        body: &Value,
        exchange: &str,
        routing_key: &str,
        headers: &Map<String, Value>,
        properties: &MessageProperties,
    ) -> CeleryResult<bool> {
        let channel = self.connection.channel().await?;
        if !routing_key.is_empty() {
            self.declare_queue(&channel, routing_key).await?;
        }

        let payload = serde_json::to_vec(body)?;
        let properties = MessageProperties::json_persistent().merged_with(properties);

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                fields::to_basic_properties(&properties, headers),
            )
            .await
            .map_err(|e| {
                CeleryError::transport(format!("发布消息到 {exchange}/{routing_key} 失败: {e}"))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| CeleryError::transport(format!("消息发布确认失败: {e}")))?;

        let acked = !matches!(confirmation, Confirmation::Nack(_));
        if acked {
            debug!("消息已发布到 {}/{}", exchange, routing_key);
        } else {
            warn!("RabbitMQ拒绝了发布到 {}/{} 的消息", exchange, routing_key);
        }
        Ok(acked)
    }

    async fn subscribe(&self, queue: &str, callback: MessageCallback) -> CeleryResult<Subscription> {
        let channel = self.connection.channel().await?;
        self.declare_queue(&channel, queue).await?;

        let consumer_tag = format!("celery-plus-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| CeleryError::transport(format!("创建消费者失败: {e}")))?;

        info!("开始消费队列 {}, consumer_tag={}", queue, consumer_tag);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(consume_loop(
            channel,
            consumer,
            consumer_tag.clone(),
            callback,
            shutdown_rx,
        ));

        Ok(Subscription::new(queue, consumer_tag, shutdown_tx, handle))
    }

    async fn disconnect(&self) -> CeleryResult<()> {
        self.connection.close().await;
        Ok(())
    }
}

async fn consume_loop(
    channel: Channel,
    mut consumer: Consumer,
    consumer_tag: String,
    callback: MessageCallback,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                if let Err(e) = channel
                    .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                    .await
                {
                    warn!("取消消费者 {} 失败: {}", consumer_tag, e);
                }
                info!("消费者 {} 已停止", consumer_tag);
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => handle_delivery(delivery, &callback).await,
                Some(Err(e)) => {
                    error!("消费者 {} 接收消息失败: {}", consumer_tag, e);
                    break;
                }
                None => {
                    warn!("消费者 {} 的消息流已结束", consumer_tag);
                    break;
                }
            }
        }
    }
}

/// 内容校验失败或回调返回错误时拒绝且不重新入队，否则确认
async fn handle_delivery(delivery: Delivery, callback: &MessageCallback) {
    let message = fields::to_transport_message(&delivery);

    let outcome = message
        .validate_content()
        .and_then(|()| callback(message));

    match outcome {
        Ok(()) => {
            if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                error!("确认消息 {} 失败: {}", delivery.delivery_tag, e);
            }
        }
        Err(err) => {
            warn!("丢弃消息 {}: {}", delivery.delivery_tag, err);
            let options = BasicNackOptions {
                requeue: false,
                ..Default::default()
            };
            if let Err(e) = delivery.acker.nack(options).await {
                error!("拒绝消息 {} 失败: {}", delivery.delivery_tag, e);
            }
        }
    }
}
