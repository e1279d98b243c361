use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CeleryError {
    #[error("传输层错误: {0}")]
    Transport(String),
    #[error("适配器已关闭: {0}")]
    AdapterClosed(String),
    #[error("协议解码错误: {0}")]
    ProtocolDecode(String),
    #[error("无法识别的任务信封，缺少任务处理器: {0}")]
    UnrecognizedEnvelope(String),
    #[error("缺少任务处理器: {task}")]
    HandlerNotFound { task: String },
    #[error("未定义的任务处理器: {name}")]
    UndefinedHandler { name: String },
    #[error("任务处理器已注册: {name}")]
    HandlerAlreadyRegistered { name: String },
    #[error("任务执行错误: {0}")]
    HandlerExecution(String),
    /// 结果状态错误，Display只输出状态字符串（FAILURE、REVOKED、TIMEOUT）
    #[error("{state}")]
    TaskState { state: String, data: Value },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type CeleryResult<T> = Result<T, CeleryError>;

impl CeleryError {
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolDecode(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn handler_execution<S: Into<String>>(msg: S) -> Self {
        Self::HandlerExecution(msg.into())
    }
    pub fn handler_not_found<S: Into<String>>(task: S) -> Self {
        Self::HandlerNotFound { task: task.into() }
    }
    pub fn task_state<S: Into<String>>(state: S, data: Value) -> Self {
        Self::TaskState {
            state: state.into(),
            data,
        }
    }

    /// 需要拒绝且不重新入队的错误（毒消息、未知任务）
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            CeleryError::ProtocolDecode(_)
                | CeleryError::UnrecognizedEnvelope(_)
                | CeleryError::HandlerNotFound { .. }
                | CeleryError::Serialization(_)
        )
    }

    /// 客户端合成的超时，从不持久化
    pub fn is_client_timeout(&self) -> bool {
        matches!(self, CeleryError::TaskState { state, .. } if state == "TIMEOUT")
    }

    /// 状态错误携带的结果数据
    pub fn data(&self) -> Option<&Value> {
        match self {
            CeleryError::TaskState { data, .. } => Some(data),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CeleryError {
    fn from(err: serde_json::Error) -> Self {
        CeleryError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CeleryError {
    fn from(err: anyhow::Error) -> Self {
        CeleryError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
