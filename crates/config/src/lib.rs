pub mod models;
pub mod validation;

pub use models::{
    AppConfig, BackendConfig, BackendKind, BrokerConfig, BrokerKind, LoggingConfig, WorkerConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

/// 默认结果过期时间（毫秒），即一天
pub const DEFAULT_RESULT_EXPIRES_MS: u64 = 86_400_000;
/// 默认消费队列
pub const DEFAULT_QUEUE: &str = "celery";
/// 默认直连交换机
pub const DEFAULT_EXCHANGE: &str = "default";
