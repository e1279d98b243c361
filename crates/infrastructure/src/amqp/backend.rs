use async_trait::async_trait;
use celery_config::BackendConfig;
use celery_domain::{
    result_queue_name, MessageProperties, ResultBackend, ResultRecord, TaskState,
};
use celery_errors::{CeleryError, CeleryResult};
use lapin::options::*;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::Channel;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::connection::{AmqpConnection, ConnectionState};
use super::fields;

/// RabbitMQ结果后端
///
/// 每个任务一个结果队列（持久、自动删除、带 `x-expires`），读取即出队。
pub struct AmqpBackend {
    connection: AmqpConnection,
    result_expires_ms: u64,
}

impl AmqpBackend {
    pub fn new(config: &BackendConfig) -> CeleryResult<Self> {
        let url = config.connection_url()?;
        Ok(Self {
            connection: AmqpConnection::new("backend", url, false),
            result_expires_ms: config.result_expires_ms,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    async fn try_store(&self, task_id: &str, result: Value, state: TaskState) -> CeleryResult<()> {
        let channel = self.connection.channel().await?;
        let queue = result_queue_name(task_id);
        declare_result_queue(&channel, &queue, self.result_expires_ms).await?;

        let record = ResultRecord::completed(task_id, result, state);
        let payload = serde_json::to_vec(&record)?;
        let properties = MessageProperties {
            correlation_id: Some(task_id.to_string()),
            ..MessageProperties::json_persistent()
        };

        channel
            .basic_publish(
                "",
                &queue,
                BasicPublishOptions::default(),
                &payload,
                fields::to_basic_properties(&properties, &Map::new()),
            )
            .await
            .map_err(|e| CeleryError::transport(format!("发布结果到队列 {queue} 失败: {e}")))?
            .await
            .map_err(|e| CeleryError::transport(format!("结果发布失败: {e}")))?;

        debug!("任务 {} 的结果已保存: {}", task_id, record.status);
        Ok(())
    }
}

async fn declare_result_queue(channel: &Channel, queue: &str, expires_ms: u64) -> CeleryResult<()> {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-expires".to_string()),
        AMQPValue::LongLongInt(expires_ms as i64),
    );

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map_err(|e| CeleryError::transport(format!("声明结果队列 {queue} 失败: {e}")))?;
    Ok(())
}

/// 取出一条结果并立即确认；内容校验失败的消息同样被确认丢弃
async fn pop_result(channel: Channel, queue: String, expires_ms: u64) -> CeleryResult<Option<ResultRecord>> {
    declare_result_queue(&channel, &queue, expires_ms).await?;

    let Some(message) = channel
        .basic_get(&queue, BasicGetOptions { no_ack: false })
        .await
        .map_err(|e| CeleryError::transport(format!("从结果队列 {queue} 读取失败: {e}")))?
    else {
        return Ok(None);
    };

    channel
        .basic_ack(message.delivery.delivery_tag, BasicAckOptions::default())
        .await
        .map_err(|e| CeleryError::transport(format!("确认结果消息失败: {e}")))?;

    let transport = fields::to_transport_message(&message.delivery);
    transport.validate_content()?;
    let record: ResultRecord = serde_json::from_value(transport.decode()?)?;
    Ok(Some(record))
}

#[async_trait]
impl ResultBackend for AmqpBackend {
    async fn is_ready(&self) -> CeleryResult<()> {
        self.connection.channel().await.map(|_| ())
    }

    async fn store_result(&self, task_id: &str, result: Value, state: TaskState) -> bool {
        match self.try_store(task_id, result, state).await {
            Ok(()) => true,
            Err(e) => {
                error!("保存任务 {} 的结果失败: {}", task_id, e);
                false
            }
        }
    }

    async fn get_task_meta(&self, task_id: &str) -> Option<ResultRecord> {
        let channel = match self.connection.channel().await {
            Ok(channel) => channel,
            Err(e) => {
                error!("读取任务 {} 的结果失败: {}", task_id, e);
                return None;
            }
        };

        // 取出和确认在独立任务中完成，调用方被取消也不会留下未确认的消息
        let queue = result_queue_name(task_id);
        let handle = tokio::spawn(pop_result(channel, queue, self.result_expires_ms));
        match handle.await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!("读取任务 {} 的结果失败: {}", task_id, e);
                None
            }
            Err(e) => {
                error!("读取任务 {} 的结果时任务异常退出: {}", task_id, e);
                None
            }
        }
    }

    async fn disconnect(&self) -> CeleryResult<()> {
        self.connection.close().await;
        Ok(())
    }
}
