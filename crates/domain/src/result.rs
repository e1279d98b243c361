use std::fmt;
use std::str::FromStr;

use celery_errors::{CeleryError, CeleryResult};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
    Rejected,
    Ignored,
    /// 客户端合成状态，从不持久化
    Timeout,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Received => "RECEIVED",
            TaskState::Started => "STARTED",
            TaskState::Retry => "RETRY",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Revoked => "REVOKED",
            TaskState::Rejected => "REJECTED",
            TaskState::Ignored => "IGNORED",
            TaskState::Timeout => "TIMEOUT",
        }
    }

    /// 终态：SUCCESS、FAILURE、REVOKED
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked
        )
    }

    /// 需要以错误形式返回给调用方的状态
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TaskState::Timeout | TaskState::Failure | TaskState::Revoked
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = CeleryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_uppercase()))
            .map_err(|_| CeleryError::decode(format!("未知的任务状态: {s}")))
    }
}

/// 结果后端中保存的任务结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: TaskState,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub traceback: Option<Value>,
    #[serde(default)]
    pub children: Vec<Value>,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub date_done: Option<String>,
}

impl ResultRecord {
    /// 任务完成记录，FAILURE 状态的结果固定为 null
    pub fn completed(task_id: &str, result: Value, state: TaskState) -> Self {
        let result = if state == TaskState::Failure {
            Value::Null
        } else {
            result
        };
        Self {
            status: state,
            result,
            traceback: None,
            children: Vec::new(),
            task_id: task_id.to_string(),
            date_done: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    /// 等待超时时由客户端构造的合成记录
    pub fn timeout(task_id: &str) -> Self {
        Self {
            status: TaskState::Timeout,
            result: json!({}),
            traceback: None,
            children: Vec::new(),
            task_id: task_id.to_string(),
            date_done: None,
        }
    }

    /// 错误状态转为 `CeleryError::TaskState`，其余返回结果值
    pub fn into_outcome(self) -> CeleryResult<Value> {
        if self.status.is_error() {
            return Err(CeleryError::task_state(self.status.as_str(), self.result));
        }
        Ok(self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_sets() {
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
        assert!(TaskState::Revoked.is_terminal());
        assert!(!TaskState::Timeout.is_terminal());
        assert!(!TaskState::Started.is_terminal());

        assert!(TaskState::Timeout.is_error());
        assert!(!TaskState::Success.is_error());
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("SUCCESS".parse::<TaskState>().unwrap(), TaskState::Success);
        assert_eq!("failure".parse::<TaskState>().unwrap(), TaskState::Failure);
        assert!("BOGUS".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_failure_record_discards_result() {
        let record = ResultRecord::completed("abc", json!("boom"), TaskState::Failure);
        assert_eq!(record.result, Value::Null);
        assert_eq!(record.status, TaskState::Failure);
    }

    #[test]
    fn test_wire_format() {
        let record = ResultRecord::completed("abc-123", json!(3), TaskState::Success);
        let wire = serde_json::to_value(&record).unwrap();

        assert_eq!(wire["status"], "SUCCESS");
        assert_eq!(wire["result"], 3);
        assert_eq!(wire["traceback"], Value::Null);
        assert_eq!(wire["children"], json!([]));
        assert_eq!(wire["task_id"], "abc-123");
        assert!(wire["date_done"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_into_outcome() {
        let ok = ResultRecord::completed("a", json!(3), TaskState::Success);
        assert_eq!(ok.into_outcome().unwrap(), json!(3));

        let err = ResultRecord::completed("a", json!("boom"), TaskState::Failure)
            .into_outcome()
            .unwrap_err();
        assert_eq!(err.to_string(), "FAILURE");
        assert_eq!(err.data(), Some(&Value::Null));

        let err = ResultRecord::timeout("a").into_outcome().unwrap_err();
        assert_eq!(err.to_string(), "TIMEOUT");
        assert_eq!(err.data(), Some(&json!({})));
    }
}
