use std::fmt;
use std::sync::{Arc, RwLock};

use celery_errors::{CeleryError, CeleryResult};
use lapin::options::ConfirmSelectOptions;
use futures::{Stream, StreamExt};
use lapin::{Channel, Connection, ConnectionProperties, Event};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 连接状态机
///
/// `Failed` 和 `Closed` 是终态：不会自动重连，需要重新创建适配器。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed(String),
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

struct Handles {
    connection: Connection,
    channel: Channel,
}

/// 惰性建立、只建立一次的连接与通道
pub struct AmqpConnection {
    name: &'static str,
    url: String,
    confirm: bool,
    state: Arc<RwLock<ConnectionState>>,
    handles: Mutex<Option<Handles>>,
}

impl AmqpConnection {
    /// `confirm` 为true时通道进入发布确认模式
    pub fn new(name: &'static str, url: impl Into<String>, confirm: bool) -> Self {
        Self {
            name,
            url: url.into(),
            confirm,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            handles: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn set_state(&self, next: ConnectionState) {
        set_state(&self.state, next);
    }

    /// 返回通道，首次调用时建立连接
    ///
    /// 建立失败的错误只返回给第一个调用方，之后的调用得到 `AdapterClosed`。
    pub async fn channel(&self) -> CeleryResult<Channel> {
        let mut handles = self.handles.lock().await;

        match self.state() {
            ConnectionState::Ready => {
                if let Some(h) = handles.as_ref() {
                    return Ok(h.channel.clone());
                }
            }
            ConnectionState::Closed => {
                return Err(CeleryError::AdapterClosed(format!("{}连接已关闭", self.name)));
            }
            ConnectionState::Failed(reason) => {
                return Err(CeleryError::AdapterClosed(format!(
                    "{}连接已失败: {reason}",
                    self.name
                )));
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.set_state(ConnectionState::Connecting);
        match self.establish().await {
            Ok(h) => {
                let channel = h.channel.clone();
                *handles = Some(h);
                self.set_state(ConnectionState::Ready);
                info!("{}已连接到RabbitMQ", self.name);
                Ok(channel)
            }
            Err(e) => {
                error!("{}连接RabbitMQ失败: {}", self.name, e);
                self.set_state(ConnectionState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn establish(&self) -> CeleryResult<Handles> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| CeleryError::transport(format!("连接RabbitMQ失败: {e}")))?;

        tokio::spawn(watch_events(
            self.name,
            self.state.clone(),
            connection.events_listener(),
        ));

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| CeleryError::transport(format!("创建通道失败: {e}")))?;

        if self.confirm {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| CeleryError::transport(format!("开启发布确认失败: {e}")))?;
        }

        debug!("{}通道已创建, confirm={}", self.name, self.confirm);
        Ok(Handles {
            connection,
            channel,
        })
    }

    /// 先关通道再关连接，单步失败只记录日志；之后状态为 `Closed`
    pub async fn close(&self) {
        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.take() {
            if let Err(e) = h.channel.close(200, "正常关闭").await {
                warn!("{}关闭通道失败: {}", self.name, e);
            }
            if let Err(e) = h.connection.close(200, "正常关闭").await {
                warn!("{}关闭连接失败: {}", self.name, e);
            }
            info!("{}RabbitMQ连接已关闭", self.name);
        }
        self.set_state(ConnectionState::Closed);
    }
}

fn set_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    let mut guard = state.write().unwrap_or_else(|e| e.into_inner());
    // Closed 之后的连接错误回调不再改变状态
    if *guard == ConnectionState::Closed {
        return;
    }
    *guard = next;
}

/// 跟踪连接事件，出错时进入 `Failed`
async fn watch_events<S>(name: &'static str, state: Arc<RwLock<ConnectionState>>, events: S)
where
    S: Stream<Item = Event> + Send,
{
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event {
            Event::Error(err) => {
                error!("{}连接出错: {}", name, err);
                set_state(&state, ConnectionState::Failed(err.to_string()));
            }
            Event::ConnectionBlocked(reason) => warn!("{}连接被服务端阻塞: {}", name, reason),
            Event::ConnectionUnblocked => info!("{}连接已解除阻塞", name),
            Event::Connected => debug!("{}连接事件: connected", name),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed("x".into()).is_terminal());
        assert!(!ConnectionState::Ready.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }

    fn shared(state: ConnectionState) -> Arc<RwLock<ConnectionState>> {
        Arc::new(RwLock::new(state))
    }

    #[tokio::test]
    async fn test_error_event_fails_connection() {
        let state = shared(ConnectionState::Ready);
        let events = futures::stream::iter(vec![
            Event::ConnectionBlocked("low memory".to_string()),
            Event::ConnectionUnblocked,
            Event::Error(lapin::ErrorKind::ChannelsLimitReached.into()),
        ]);

        watch_events("broker", Arc::clone(&state), events).await;
        assert!(matches!(*state.read().unwrap(), ConnectionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_error_event_after_close_is_ignored() {
        let state = shared(ConnectionState::Closed);
        let events = futures::stream::iter(vec![Event::Error(
            lapin::ErrorKind::ChannelsLimitReached.into(),
        )]);

        watch_events("backend", Arc::clone(&state), events).await;
        assert_eq!(*state.read().unwrap(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_connection_is_unusable() {
        let connection = AmqpConnection::new("broker", "amqp://localhost:5672", true);
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(matches!(
            connection.channel().await,
            Err(CeleryError::AdapterClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_connection_is_not_retried() {
        let connection = AmqpConnection::new("backend", "amqp://127.0.0.1:1", false);

        let first = connection.channel().await;
        assert!(matches!(first, Err(CeleryError::Transport(_))));
        assert!(matches!(connection.state(), ConnectionState::Failed(_)));

        let second = connection.channel().await;
        assert!(matches!(second, Err(CeleryError::AdapterClosed(_))));
    }
}
