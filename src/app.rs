use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use gateway_config::AppConfig;
use gateway_dispatcher::{GatewayServer, GatewayService};
use gateway_domain::{MetricsForwarder, MinionIdentity};
use gateway_infrastructure::{
    create_task_set_store, install_prometheus_exporter, PrometheusForwarder, StoreBackend,
};
use gateway_worker::{default_system_id, MinionAgent, MinionClient, MinionClientConfig, ModuleRegistry};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, PartialEq)]
pub enum AppMode {
    /// 运行网关控制面
    Gateway,
    /// 作为Minion连接到网关
    Minion,
}

impl AppMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "gateway" => Ok(AppMode::Gateway),
            "minion" => Ok(AppMode::Minion),
            other => Err(anyhow::anyhow!("不支持的运行模式: {other}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!("初始化应用程序，模式: {:?}", mode);
        Self { config, mode }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Gateway => self.run_gateway(shutdown_rx).await,
            AppMode::Minion => self.run_minion(shutdown_rx).await,
        }
    }

    async fn run_gateway(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动网关服务");

        let service = Arc::new(build_gateway_service(&self.config).await?);

        let server = GatewayServer::bind(
            &self.config.server.bind_address,
            service.sessions(),
            self.config.server.max_frame_bytes,
        )
        .await
        .with_context(|| format!("绑定网关监听地址失败: {}", self.config.server.bind_address))?;

        if let Ok(addr) = server.local_addr() {
            info!("网关监听地址: {}", addr);
        }

        let sweeper = service.spawn_expiry_sweeper(
            self.config.rpc.sweep_interval(),
            shutdown_rx.resubscribe(),
        );
        let server_handle = tokio::spawn(server.run(shutdown_rx.resubscribe()));

        let _ = shutdown_rx.recv().await;
        info!("网关服务收到关闭信号");

        match server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("网关连接服务异常退出: {e}"),
            Err(e) => error!("等待网关连接服务退出失败: {e}"),
        }
        if let Err(e) = sweeper.await {
            warn!("等待过期清理任务退出失败: {e}");
        }

        info!("网关服务已停止");
        Ok(())
    }

    async fn run_minion(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let minion = &self.config.minion;
        let system_id = minion.system_id.clone().unwrap_or_else(default_system_id);
        let identity = MinionIdentity::new(minion.tenant_id.clone(), system_id, minion.location.clone());
        info!("启动Minion: {}", identity);

        let modules = Arc::new(ModuleRegistry::with_defaults().await);
        let agent = Arc::new(MinionAgent::new(identity, modules));
        let client_config = MinionClientConfig::new(minion.gateway_address.clone())
            .with_reconnect_delay(minion.reconnect_delay());
        let client = Arc::new(MinionClient::new(client_config, agent));

        client.run(shutdown_rx).await;

        info!("Minion已停止");
        Ok(())
    }
}

/// 根据配置组装网关服务：任务集存储、指标转发与RPC默认有效期
pub async fn build_gateway_service(config: &AppConfig) -> Result<GatewayService> {
    let backend = StoreBackend::parse(&config.store.backend)?;
    let store = create_task_set_store(&backend, &config.store.url, config.store.max_connections)
        .await
        .with_context(|| format!("创建任务集存储失败: {}", config.store.url))?;
    info!("任务集存储已就绪: {:?}", backend);

    if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .prometheus_bind_address
            .parse()
            .with_context(|| {
                format!("无效的指标监听地址: {}", config.metrics.prometheus_bind_address)
            })?;
        install_prometheus_exporter(addr)?;
    }
    let forwarder: Arc<dyn MetricsForwarder> =
        Arc::new(PrometheusForwarder::new(config.metrics.prefix.clone()));

    Ok(GatewayService::new(store, forwarder).with_default_ttl(config.rpc.default_ttl()))
}
