use celery_errors::CeleryResult;
use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub hostname: String,
    /// `AsyncResult::get` 的默认轮询间隔
    pub poll_interval_ms: u64,
    /// 停止时等待进行中任务的最长时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            poll_interval_ms: 500,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> CeleryResult<()> {
        ValidationUtils::validate_not_empty(&self.hostname, "worker.hostname")?;
        ValidationUtils::validate_positive(
            self.poll_interval_ms,
            "worker.poll_interval_ms",
        )?;
        Ok(())
    }
}
