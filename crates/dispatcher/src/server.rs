//! Minion接入服务
//!
//! 每条TCP连接拆成读写两半：写任务从连接的发送队列取消息编码写出，
//! 读循环把解码后的帧交给 [`SessionManager`]。

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use gateway_domain::{GatewayMessage, MinionMessage, MinionTransport};
use gateway_errors::{GatewayError, GatewayResult};
use gateway_infrastructure::{ChannelTransport, JsonFrameCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::SessionManager;

pub struct GatewayServer {
    listener: TcpListener,
    sessions: Arc<SessionManager>,
    max_frame_bytes: usize,
}

impl GatewayServer {
    pub async fn bind(
        address: &str,
        sessions: Arc<SessionManager>,
        max_frame_bytes: usize,
    ) -> GatewayResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| GatewayError::transport_error(format!("监听 {address} 失败: {e}")))?;
        Ok(Self {
            listener,
            sessions,
            max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| GatewayError::transport_error(format!("获取监听地址失败: {e}")))
    }

    /// 接受连接直到收到关闭信号，然后断开所有连接
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> GatewayResult<()> {
        let local_addr = self.local_addr()?;
        info!("Minion接入服务监听于 {}", local_addr);

        let shutdown = CancellationToken::new();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("接受来自 {} 的连接", peer);
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.sessions),
                            self.max_frame_bytes,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("连接任务异常退出: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Minion接入服务收到关闭信号");
                    break;
                }
            }
        }

        shutdown.cancel();
        while connections.join_next().await.is_some() {}
        info!("Minion接入服务已停止");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: Arc<SessionManager>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        JsonFrameCodec::<MinionMessage>::new(max_frame_bytes),
    );
    let mut writer = FramedWrite::new(
        write_half,
        JsonFrameCodec::<GatewayMessage>::new(max_frame_bytes),
    );

    let (transport, mut outbound) = ChannelTransport::new();
    let closed = transport.closed_token();
    let transport: Arc<dyn MinionTransport> = Arc::new(transport);
    let mut session = sessions.open(Arc::clone(&transport));

    let writer_closed = closed.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(message) => {
                        if let Err(e) = writer.send(message).await {
                            warn!("向 {} 写消息失败: {}", peer, e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_closed.cancelled() => break,
            }
        }
        writer_closed.cancel();
    });

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(decoded)) => sessions.handle_frame(&mut session, decoded).await,
                Some(Err(e)) => {
                    warn!("读取 {} 失败: {}", peer, e);
                    break;
                }
                None => {
                    debug!("{} 关闭了连接", peer);
                    break;
                }
            },
            _ = closed.cancelled() => {
                debug!("连接 {} 已被关闭", peer);
                break;
            }
            _ = shutdown.cancelled() => break,
        }
    }

    sessions.close(session).await;
    if let Err(e) = writer_task.await {
        error!("写任务异常退出: {}", e);
    }
}
