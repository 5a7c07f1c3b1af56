use gateway_domain::{GatewayMessage, MinionTransport};
use gateway_errors::{GatewayError, GatewayResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 基于无界通道的Minion传输
///
/// 连接的写任务持有接收端，`close` 通过取消令牌通知读写任务退出。
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<GatewayMessage>,
    closed: CancellationToken,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                closed: CancellationToken::new(),
            },
            receiver,
        )
    }

    /// 连接关闭时被取消的令牌
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl MinionTransport for ChannelTransport {
    fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        if self.closed.is_cancelled() {
            return Err(GatewayError::transport_error("连接已关闭"));
        }
        self.sender
            .send(message)
            .map_err(|e| GatewayError::transport_error(format!("发送队列已关闭: {e}")))
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_domain::TwinObject;
    use std::collections::HashMap;

    fn twin(version: u64) -> GatewayMessage {
        GatewayMessage::Twin(TwinObject {
            key: "t1/loc1".to_string(),
            version,
            is_patch: false,
            payload: Vec::new(),
            session_id: "s1".to_string(),
            tracing_info: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (transport, mut receiver) = ChannelTransport::new();
        transport.send(twin(1)).unwrap();
        transport.send(twin(2)).unwrap();

        assert_eq!(receiver.recv().await, Some(twin(1)));
        assert_eq!(receiver.recv().await, Some(twin(2)));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _receiver) = ChannelTransport::new();
        assert!(transport.is_open());

        transport.close();
        assert!(!transport.is_open());
        assert!(transport.closed_token().is_cancelled());
        assert!(matches!(
            transport.send(twin(1)),
            Err(GatewayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes_transport() {
        let (transport, receiver) = ChannelTransport::new();
        drop(receiver);
        assert!(!transport.is_open());
        assert!(transport.send(twin(1)).is_err());
    }
}
