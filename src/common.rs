use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use celery_client::Client;
use celery_config::{AppConfig, ConfigValidator};
use celery_domain::{Broker, ResultBackend};
use celery_infrastructure::AdapterFactory;
use celery_worker::Worker;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::shutdown::ShutdownManager;
use crate::tasks::register_builtin_tasks;

/// 命令行给出的启动参数，优先于配置文件
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub queue: Option<String>,
    pub broker_url: Option<String>,
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载配置并叠加命令行覆盖项
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref())
        .context("加载配置失败")?;

    if let Some(ref level) = startup_config.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref format) = startup_config.log_format {
        config.logging.format = format.clone();
    }
    if let Some(ref queue) = startup_config.queue {
        config.broker.queue = queue.clone();
    }
    if let Some(ref url) = startup_config.broker_url {
        config.broker.url = url.clone();
    }

    config.validate().context("命令行参数覆盖后的配置无效")?;
    Ok(config)
}

/// 同一进程内Worker与客户端共用的适配器
///
/// 内存适配器只在同一实例内互通，因此要先创建一次再分别交给Worker和客户端。
#[derive(Clone)]
pub struct Adapters {
    pub broker: Arc<dyn Broker>,
    pub backend: Arc<dyn ResultBackend>,
}

/// 按配置创建消息代理和结果后端
pub fn build_adapters(config: &AppConfig) -> Result<Adapters> {
    let broker = AdapterFactory::create_broker(&config.broker).context("创建消息代理失败")?;
    let backend = AdapterFactory::create_backend(&config.backend).context("创建结果后端失败")?;
    Ok(Adapters { broker, backend })
}

/// 在给定适配器上创建Worker并注册内置任务
pub fn build_worker(config: &AppConfig, adapters: &Adapters) -> Result<Worker> {
    let worker = Worker::new(
        Arc::clone(&adapters.broker),
        Arc::clone(&adapters.backend),
        config.broker.queue.clone(),
    );
    register_builtin_tasks(&worker)?;
    Ok(worker)
}

/// 在给定适配器上创建客户端
pub fn build_client(config: &AppConfig, adapters: &Adapters) -> Client {
    Client::new(Arc::clone(&adapters.broker), Arc::clone(&adapters.backend))
        .with_queue(config.broker.queue.clone())
        .with_hostname(&config.worker.hostname)
        .with_poll_interval(Duration::from_millis(config.worker.poll_interval_ms))
}

/// 运行Worker直到 `shutdown` 被触发，然后排空进行中的任务并断开连接
pub async fn run_worker(worker: Arc<Worker>, shutdown: ShutdownManager) -> Result<()> {
    let mut shutdown_rx = shutdown.subscribe().await;

    worker.start().await.context("启动Worker失败")?;
    info!("Worker已启动, 队列: {}", worker.queue());

    let _ = shutdown_rx.recv().await;
    info!("收到关闭信号，开始优雅关闭...");

    match shutdown.drain(worker.stop()).await {
        Some(outcomes) => {
            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            info!("进行中的任务已结束: {} 个, 其中失败 {} 个", outcomes.len(), failed);
        }
        None => warn!("仍有 {} 个任务未结束", worker.active_count()),
    }

    if let Err(e) = worker.disconnect().await {
        error!("断开连接失败: {e}");
    }

    info!("Worker已退出");
    Ok(())
}

/// 以配置启动Worker进程，阻塞直到收到系统信号
pub async fn start_worker(startup_config: StartupConfig) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(&config.logging.level, &config.logging.format)?;

    info!("启动Celery Worker");
    info!(
        "消息代理: {}, 结果后端: {}, 队列: {}",
        config.broker.kind, config.backend.kind, config.broker.queue
    );

    let adapters = build_adapters(&config)?;
    let worker = Arc::new(build_worker(&config, &adapters)?);
    let shutdown = ShutdownManager::new(Duration::from_secs(config.worker.shutdown_timeout_seconds));

    let mut handle = {
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_worker(worker, shutdown).await })
    };

    let joined = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            shutdown.shutdown().await;
            handle.await
        }
        joined = &mut handle => joined,
    };

    match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("Worker任务异常退出: {e}")),
    }
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use celery_config::{BackendKind, BrokerKind};
    use serde_json::{json, Map};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn memory_config_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[broker]
kind = "memory"
queue = "from-file"

[backend]
kind = "memory"

[logging]
level = "debug"
"#
        )
        .unwrap();
        file
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let file = memory_config_file();
        let startup = StartupConfig {
            config_path: Some(file.path().to_string_lossy().to_string()),
            queue: Some("from-cli".to_string()),
            log_format: Some("json".to_string()),
            ..Default::default()
        };

        let config = load_config(&startup).unwrap();
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.broker.queue, "from-cli");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_config_rejects_invalid_override() {
        let file = memory_config_file();
        let startup = StartupConfig {
            config_path: Some(file.path().to_string_lossy().to_string()),
            log_format: Some("xml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let startup = StartupConfig {
            config_path: Some("config/celery.toml".to_string()),
            ..Default::default()
        };
        let config = load_config(&startup).unwrap();
        assert_eq!(config.broker.kind, BrokerKind::Amqp);
        assert_eq!(
            config.broker.connect_options.get("heartbeat").map(String::as_str),
            Some("60")
        );
        assert!(config
            .broker
            .connection_url()
            .unwrap()
            .contains("heartbeat=60"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let startup = StartupConfig {
            config_path: Some("/nonexistent/celery.toml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.broker.kind = BrokerKind::Memory;
        config.backend.kind = BackendKind::Memory;
        config.worker.hostname = "node-1".to_string();
        config.worker.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_worker_and_client_share_memory_adapters() {
        let config = memory_config();
        let adapters = build_adapters(&config).unwrap();
        let worker = build_worker(&config, &adapters).unwrap();
        let client = build_client(&config, &adapters);
        worker.start().await.unwrap();

        let result = client
            .send_task("tasks.add", vec![json!(1), json!(2)], Map::new())
            .await
            .unwrap();
        assert_eq!(
            result.get(Some(Duration::from_secs(2))).await.unwrap(),
            json!(3)
        );

        worker.stop().await;
    }

    #[test]
    fn test_client_origin_uses_configured_hostname() {
        let config = memory_config();
        let adapters = build_adapters(&config).unwrap();
        let client = build_client(&config, &adapters);
        assert_eq!(client.origin(), format!("{}@node-1", std::process::id()));
    }

    #[tokio::test]
    async fn test_run_worker_until_shutdown() {
        let mut config = AppConfig::default();
        config.broker.kind = BrokerKind::Memory;
        config.backend.kind = BackendKind::Memory;

        let adapters = build_adapters(&config).unwrap();
        let worker = Arc::new(build_worker(&config, &adapters).unwrap());
        assert!(worker.registered_tasks().contains(&"tasks.add".to_string()));

        let shutdown = ShutdownManager::new(Duration::from_secs(1));
        let handle = tokio::spawn(run_worker(Arc::clone(&worker), shutdown.clone()));

        for _ in 0..50 {
            if worker.is_running().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(worker.is_running().await);

        shutdown.shutdown().await;
        handle.await.unwrap().unwrap();
        assert!(!worker.is_running().await);
    }
}
