use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};

use job_scheduler::{Application, ShutdownManager};
use scheduler_core::config::AppConfig;
use scheduler_core::logging::init_logging;
use scheduler_core::traits::JobFactoryMap;
use scheduler_core::SystemClock;
use scheduler_domain::SystemJobRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("job-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式作业调度节点")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找 config/scheduler.toml 和 scheduler.toml"),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("节点ID，覆盖配置文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置失败: {}",
            config_path.map(String::as_str).unwrap_or("默认路径")
        )
    })?;

    if let Some(node_id) = matches.get_one::<String>("node-id") {
        config.node.node_id = node_id.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动作业调度节点: {}", config.node.node_id);
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let shutdown_timeout = config.scheduler.shutdown_timeout()
        + config.system_scheduler.shutdown_timeout()
        + Duration::from_secs(5);

    let app = Arc::new(
        Application::new(
            config,
            SystemClock::shared(),
            SystemJobRegistry::new(),
            JobFactoryMap::new(),
        )
        .await?,
    );

    let shutdown_manager = ShutdownManager::new();
    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        result = &mut app_handle => {
            // 启动失败时提前结束
            return match result {
                Ok(run_result) => run_result,
                Err(e) => Err(anyhow::anyhow!("节点任务异常结束: {e}")),
            };
        }
    }
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(Ok(Ok(()))) => info!("节点已优雅关闭"),
        Ok(Ok(Err(e))) => error!("节点运行失败: {e:#}"),
        Ok(Err(e)) => error!("节点任务异常结束: {e}"),
        Err(_) => warn!("节点关闭超时，强制退出"),
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
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
