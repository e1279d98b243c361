use celery_errors::{CeleryError, CeleryResult};

/// 配置校验
pub trait ConfigValidator {
    fn validate(&self) -> CeleryResult<()>;
}

pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> CeleryResult<()> {
        if value.trim().is_empty() {
            return Err(CeleryError::config_error(format!("{field}不能为空")));
        }
        Ok(())
    }

    pub fn validate_amqp_url(url: &str, field: &str) -> CeleryResult<()> {
        Self::validate_not_empty(url, field)?;
        if !url.starts_with("amqp://") && !url.starts_with("amqps://") {
            return Err(CeleryError::config_error(format!(
                "{field}必须以amqp://或amqps://开头: {url}"
            )));
        }
        Ok(())
    }

    pub fn validate_positive(value: u64, field: &str) -> CeleryResult<()> {
        if value == 0 {
            return Err(CeleryError::config_error(format!("{field}必须大于0")));
        }
        Ok(())
    }

    pub fn validate_one_of(value: &str, field: &str, allowed: &[&str]) -> CeleryResult<()> {
        if !allowed.contains(&value.to_lowercase().as_str()) {
            return Err(CeleryError::config_error(format!(
                "{field}的值无效: {value}，可选值: {allowed:?}"
            )));
        }
        Ok(())
    }
}
