use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use gateway_config::AppConfig;
use gateway_worker::RuntimeFactory;
use minion_gateway::app::{AppMode, Application};
use minion_gateway::shutdown::ShutdownSignal;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("minion-gateway")
        .version("1.0.0")
        .about("Minion网关：任务集分发、孪生状态同步与RPC路由")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，不存在时使用内置默认值")
                .default_value("config/gateway.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["gateway", "minion"])
                .default_value("gateway"),
        )
        .arg(
            Arg::new("system-id")
                .long("system-id")
                .value_name("ID")
                .help("Minion系统ID (仅在minion模式下使用)"),
        )
        .arg(
            Arg::new("location")
                .long("location")
                .value_name("LOCATION")
                .help("Minion所在位置 (仅在minion模式下使用)"),
        )
        .arg(
            Arg::new("tenant")
                .long("tenant")
                .value_name("TENANT")
                .help("Minion所属租户 (仅在minion模式下使用)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .context("缺少配置文件路径参数")?;
    let mode_str = matches.get_one::<String>("mode").context("缺少运行模式参数")?;
    let log_level = matches
        .get_one::<String>("log-level")
        .context("缺少日志级别参数")?;
    let log_format = matches
        .get_one::<String>("log-format")
        .context("缺少日志格式参数")?;

    init_logging(log_level, log_format)?;

    info!("启动Minion网关");
    info!("配置文件: {config_path}");
    info!("运行模式: {mode_str}");

    let mut config = if Path::new(config_path).exists() {
        AppConfig::load(Some(config_path))
            .with_context(|| format!("加载配置文件失败: {config_path}"))?
    } else {
        warn!("配置文件不存在，使用默认配置: {config_path}");
        AppConfig::load(None).context("加载默认配置失败")?
    };

    // 命令行参数覆盖配置中的Minion身份
    if let Some(system_id) = matches.get_one::<String>("system-id") {
        config.minion.system_id = Some(system_id.clone());
    }
    if let Some(location) = matches.get_one::<String>("location") {
        config.minion.location = location.clone();
    }
    if let Some(tenant) = matches.get_one::<String>("tenant") {
        config.minion.tenant_id = tenant.clone();
    }

    let app_mode = AppMode::parse(mode_str)?;

    let mut runtime_factory = RuntimeFactory::new("minion-gateway");
    if let Some(worker_threads) = config.server.worker_threads {
        runtime_factory = runtime_factory.with_worker_threads(worker_threads);
    }
    let runtime = runtime_factory.build().context("创建Tokio运行时失败")?;

    runtime.block_on(run(config, app_mode))
}

async fn run(config: AppConfig, app_mode: AppMode) -> Result<()> {
    let app = Application::new(config, app_mode);

    let shutdown = ShutdownSignal::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown.subscribe();

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");

    shutdown.trigger();

    // 等待应用关闭，设置超时
    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("Minion网关已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
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

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
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
