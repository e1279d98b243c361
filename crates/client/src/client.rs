use std::sync::Arc;
use std::time::Duration;

use celery_domain::{encode_v1, encode_v2, Broker, ResultBackend, TaskInvocation};
use celery_errors::{CeleryError, CeleryResult};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::async_result::{AsyncResult, DEFAULT_POLL_INTERVAL};

/// 发送任务时使用的信封协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskProtocol {
    V1,
    #[default]
    V2,
}

/// 任务生产者
///
/// 任务以直连方式（交换机为空，路由键为队列名）发布，返回对应的 `AsyncResult`。
#[derive(Clone)]
pub struct Client {
    broker: Arc<dyn Broker>,
    backend: Arc<dyn ResultBackend>,
    queue: String,
    protocol: TaskProtocol,
    poll_interval: Duration,
    origin: String,
}

impl Client {
    pub fn new(broker: Arc<dyn Broker>, backend: Arc<dyn ResultBackend>) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        Self {
            broker,
            backend,
            queue: "celery".to_string(),
            protocol: TaskProtocol::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            origin: format!("{}@{}", std::process::id(), hostname),
        }
    }

    /// 以 `<pid>@<hostname>` 作为消息头中的origin
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.origin = format!("{}@{}", std::process::id(), hostname);
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// 设置目标队列
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// 设置信封协议
    pub fn with_protocol(mut self, protocol: TaskProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// 设置返回的 `AsyncResult` 的默认轮询间隔
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn is_ready(&self) -> CeleryResult<()> {
        self.broker.is_ready().await?;
        self.backend.is_ready().await
    }

    /// 发送任务
    pub async fn send_task(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> CeleryResult<AsyncResult> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let argsrepr = Value::Array(args.clone()).to_string();
        let kwargsrepr = Value::Object(kwargs.clone()).to_string();

        let mut invocation = TaskInvocation::new(name, task_id.clone(), args, kwargs);
        invocation.headers.lang = Some("rust".to_string());
        invocation.headers.origin = Some(self.origin.clone());
        invocation.headers.argsrepr = Some(argsrepr);
        invocation.headers.kwargsrepr = Some(kwargsrepr);

        let envelope = match self.protocol {
            TaskProtocol::V1 => encode_v1(&invocation),
            TaskProtocol::V2 => encode_v2(&invocation),
        };

        let published = self
            .broker
            .publish(
                &envelope.body,
                "",
                &self.queue,
                &envelope.headers,
                &envelope.properties,
            )
            .await?;
        if !published {
            warn!("任务 {}[{}] 未被消息代理确认", name, task_id);
            return Err(CeleryError::transport(format!(
                "任务 {name}[{task_id}] 未被消息代理确认"
            )));
        }

        debug!("已发送任务 {}[{}] 到队列 {}", name, task_id, self.queue);
        Ok(self.async_result(task_id))
    }

    /// 按名称创建任务句柄
    pub fn create_task(&self, name: impl Into<String>) -> Task {
        Task {
            client: self.clone(),
            name: name.into(),
        }
    }

    /// 为已有任务id创建结果句柄
    pub fn async_result(&self, task_id: impl Into<String>) -> AsyncResult {
        AsyncResult::new(task_id, Arc::clone(&self.backend)).with_poll_interval(self.poll_interval)
    }

    pub async fn disconnect(&self) -> CeleryResult<()> {
        let broker = self.broker.disconnect().await;
        let backend = self.backend.disconnect().await;
        broker.and(backend)
    }
}

/// 具名任务
#[derive(Clone)]
pub struct Task {
    client: Client,
    name: String,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn apply_async(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> CeleryResult<AsyncResult> {
        self.client.send_task(&self.name, args, kwargs).await
    }

    /// 只带位置参数发送
    pub async fn delay(&self, args: Vec<Value>) -> CeleryResult<AsyncResult> {
        self.apply_async(args, Map::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use celery_domain::{decode_invocation, MessageCallback, ProtocolVersion, TransportMessage};
    use celery_infrastructure::{InMemoryBackend, InMemoryBroker};
    use serde_json::json;
    use std::sync::Mutex;

    async fn capture_one(broker: &InMemoryBroker) -> TaskInvocation {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: MessageCallback =
            Arc::new(move |message: TransportMessage| -> CeleryResult<()> {
                sink.lock().unwrap().push(decode_invocation(&message)?);
                Ok(())
            });
        let subscription = broker.subscribe("celery", callback).await.unwrap();
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        subscription.cancel().await;
        let invocation = seen.lock().unwrap().pop().expect("no message captured");
        invocation
    }

    fn client(broker: Arc<InMemoryBroker>) -> Client {
        Client::new(broker, Arc::new(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_send_task_publishes_v2_envelope() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(broker.clone());

        let mut kwargs = Map::new();
        kwargs.insert("c".into(), json!(3));
        let result = client
            .send_task("tasks.add_mixed", vec![json!(1), json!(2)], kwargs)
            .await
            .unwrap();

        let invocation = capture_one(&broker).await;
        assert_eq!(invocation.protocol, ProtocolVersion::V2);
        assert_eq!(invocation.task_name(), "tasks.add_mixed");
        assert_eq!(invocation.task_id(), result.task_id());
        assert_eq!(invocation.args, vec![json!(1), json!(2)]);
        assert_eq!(invocation.kwargs.get("c"), Some(&json!(3)));
        assert_eq!(invocation.headers.lang.as_deref(), Some("rust"));
        assert_eq!(invocation.headers.root_id.as_deref(), Some(result.task_id()));
        assert_eq!(invocation.headers.argsrepr.as_deref(), Some("[1,2]"));
        assert!(invocation.headers.origin.unwrap().contains('@'));
    }

    #[tokio::test]
    async fn test_configured_hostname_is_sent_as_origin() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(broker.clone()).with_hostname("worker-a");

        client
            .send_task("tasks.echo", vec![json!(1)], Map::new())
            .await
            .unwrap();

        let invocation = capture_one(&broker).await;
        assert_eq!(
            invocation.headers.origin,
            Some(format!("{}@worker-a", std::process::id()))
        );
    }

    #[tokio::test]
    async fn test_v1_protocol_and_task_builder() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(broker.clone()).with_protocol(TaskProtocol::V1);

        let task = client.create_task("tasks.add");
        assert_eq!(task.name(), "tasks.add");
        let result = task.delay(vec![json!(5), json!(6)]).await.unwrap();

        let invocation = capture_one(&broker).await;
        assert_eq!(invocation.protocol, ProtocolVersion::V1);
        assert_eq!(invocation.task_id(), result.task_id());
        assert!(invocation.kwargs.is_empty());
    }

    #[tokio::test]
    async fn test_send_task_on_closed_broker_fails() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client(broker.clone());
        client.disconnect().await.unwrap();

        let err = client
            .send_task("tasks.add", vec![], Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CeleryError::AdapterClosed(_)));
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let broker = Arc::new(InMemoryBroker::new());
        let task = client(broker).create_task("tasks.echo");
        let first = task.delay(vec![]).await.unwrap();
        let second = task.delay(vec![]).await.unwrap();
        assert_ne!(first.task_id(), second.task_id());
    }
}
