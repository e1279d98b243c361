use std::sync::Arc;
use std::time::Duration;

use celery_config::{BackendConfig, BackendKind, BrokerConfig, BrokerKind};
use celery_domain::{Broker, ResultBackend};
use celery_errors::CeleryResult;
use tracing::{debug, info};

use crate::{AmqpBackend, AmqpBroker, DisabledBackend, InMemoryBackend, InMemoryBroker};

/// 按配置创建消息代理和结果后端
///
/// AMQP适配器在这里只做配置解析，连接在首次使用时建立。
pub struct AdapterFactory;

impl AdapterFactory {
    pub fn create_broker(config: &BrokerConfig) -> CeleryResult<Arc<dyn Broker>> {
        debug!("Creating broker with kind: {}", config.kind);

        match config.kind {
            BrokerKind::Amqp => {
                info!("Initializing RabbitMQ broker");
                Ok(Arc::new(AmqpBroker::new(config.clone())?))
            }
            BrokerKind::Memory => {
                info!("Initializing in-memory broker");
                Ok(Arc::new(InMemoryBroker::new()))
            }
        }
    }

    pub fn create_backend(config: &BackendConfig) -> CeleryResult<Arc<dyn ResultBackend>> {
        debug!("Creating result backend with kind: {}", config.kind);

        match config.kind {
            BackendKind::Amqp => {
                info!("Initializing RabbitMQ result backend");
                Ok(Arc::new(AmqpBackend::new(config)?))
            }
            BackendKind::Disabled => {
                info!("Result backend disabled");
                Ok(Arc::new(DisabledBackend::new()))
            }
            BackendKind::Memory => {
                info!("Initializing in-memory result backend");
                Ok(Arc::new(InMemoryBackend::with_ttl(Duration::from_millis(
                    config.result_expires_ms,
                ))))
            }
        }
    }
}
