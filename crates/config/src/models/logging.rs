use celery_errors::CeleryResult;
use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "pretty"];

/// 日志配置，`RUST_LOG` 优先于 `level`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> CeleryResult<()> {
        ValidationUtils::validate_one_of(&self.level, "logging.level", &LOG_LEVELS)?;
        ValidationUtils::validate_one_of(&self.format, "logging.format", &LOG_FORMATS)?;
        Ok(())
    }
}
