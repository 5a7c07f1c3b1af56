//! Minion到网关的连接
//!
//! 断线后按固定间隔加随机抖动重连。每次连接都是新的会话：先发送Hello，
//! 网关随后下发完整的任务集快照。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gateway_domain::{DetectorResult, GatewayMessage, MinionMessage, MonitorResult};
use gateway_errors::{GatewayError, GatewayResult};
use gateway_infrastructure::{JsonFrameCodec, DEFAULT_MAX_FRAME_BYTES};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::agent::MinionAgent;

#[derive(Debug, Clone)]
pub struct MinionClientConfig {
    pub gateway_address: String,
    pub reconnect_delay: Duration,
    pub max_frame_bytes: usize,
}

impl MinionClientConfig {
    pub fn new<A: Into<String>>(gateway_address: A) -> Self {
        Self {
            gateway_address: gateway_address.into(),
            reconnect_delay: Duration::from_secs(5),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
}

type Outbound = mpsc::UnboundedSender<MinionMessage>;

pub struct MinionClient {
    config: MinionClientConfig,
    agent: Arc<MinionAgent>,
    outbound: Mutex<Option<Outbound>>,
}

impl MinionClient {
    pub fn new(config: MinionClientConfig, agent: Arc<MinionAgent>) -> Self {
        Self {
            config,
            agent,
            outbound: Mutex::new(None),
        }
    }

    pub fn agent(&self) -> &Arc<MinionAgent> {
        &self.agent
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn set_outbound(&self, outbound: Option<Outbound>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = outbound;
    }

    /// 把消息放进当前连接的发送队列，未连接时丢弃并返回 false
    pub fn report(&self, message: MinionMessage) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                debug!("未连接网关，丢弃 {} 消息", message.message_type_str());
                false
            }
        }
    }

    pub fn report_monitor_result(&self, result: MonitorResult) -> bool {
        self.report(MinionMessage::MonitorResult(result))
    }

    pub fn report_detector_result(&self, result: DetectorResult) -> bool {
        self.report(MinionMessage::DetectorResult(result))
    }

    /// 保持与网关的连接直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Minion {} 开始连接网关 {}",
            self.agent.identity(),
            self.config.gateway_address
        );

        loop {
            tokio::select! {
                result = self.connect_and_serve() => match result {
                    Ok(()) => info!("与网关的连接已关闭"),
                    Err(e) => warn!("与网关的连接中断: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("Minion客户端收到关闭信号");
                    break;
                }
            }

            let delay = self.reconnect_delay();
            debug!("{:?} 后重连网关", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("Minion客户端收到关闭信号");
                    break;
                }
            }
        }

        self.set_outbound(None);
    }

    fn reconnect_delay(&self) -> Duration {
        let base = self.config.reconnect_delay;
        let jitter_ms = (base.as_millis() as u64 / 2).max(1);
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    async fn connect_and_serve(&self) -> GatewayResult<()> {
        let stream = TcpStream::connect(&self.config.gateway_address)
            .await
            .map_err(|e| {
                GatewayError::transport_error(format!(
                    "连接 {} 失败: {e}",
                    self.config.gateway_address
                ))
            })?;
        let framed = Framed::new(
            stream,
            JsonFrameCodec::<GatewayMessage>::new(self.config.max_frame_bytes),
        );
        let (mut sink, mut frames) = framed.split::<MinionMessage>();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
        outbound
            .send(self.agent.hello())
            .map_err(|e| GatewayError::transport_error(e.to_string()))?;
        self.set_outbound(Some(outbound.clone()));
        info!("已连接网关 {}", self.config.gateway_address);

        let writer = async {
            while let Some(message) = outbound_rx.recv().await {
                sink.send(message).await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let reader = async {
            while let Some(frame) = frames.next().await {
                match frame? {
                    Ok(message) => self.dispatch(message, &outbound),
                    Err(e) => warn!("收到无法解码的网关消息: {}", e),
                }
            }
            Ok::<(), std::io::Error>(())
        };

        let result = tokio::select! {
            result = writer => result,
            result = reader => result,
        };
        self.set_outbound(None);
        result.map_err(|e| GatewayError::transport_error(format!("连接读写失败: {e}")))
    }

    fn dispatch(&self, message: GatewayMessage, outbound: &Outbound) {
        match message {
            GatewayMessage::Twin(object) => {
                if let Some(reply) = self.agent.apply_twin(&object) {
                    let _ = outbound.send(reply);
                }
            }
            GatewayMessage::RpcRequest { metadata, request } => {
                let agent = Arc::clone(&self.agent);
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    if let Some(reply) = agent.execute_rpc(&metadata, request).await {
                        let _ = outbound.send(reply);
                    }
                });
            }
        }
    }
}

/// 未配置时使用主机名作为Minion的系统ID
pub fn default_system_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "minion".to_string())
}
