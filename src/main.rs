use anyhow::Result;
use celery_plus::{start_worker, StartupConfig};
use clap::{Arg, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("celery-worker")
        .version("1.0.0")
        .about("Celery协议兼容的任务队列Worker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找默认路径"),
        )
        .arg(
            Arg::new("queue")
                .short('Q')
                .long("queue")
                .value_name("QUEUE")
                .help("消费的队列名"),
        )
        .arg(
            Arg::new("broker-url")
                .short('b')
                .long("broker-url")
                .value_name("URL")
                .help("AMQP消息代理地址"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        queue: matches.get_one::<String>("queue").cloned(),
        broker_url: matches.get_one::<String>("broker-url").cloned(),
    };

    start_worker(startup_config).await
}
