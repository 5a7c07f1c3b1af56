use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 进程级关闭信号
///
/// 网关服务器、过期清理任务和Minion客户端都各自持有一个接收端，
/// 信号只发送一次，之后的订阅者拿到的接收端立即就绪。
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        // 先订阅再检查标志，触发和订阅交错时两条路径至少有一条生效
        let rx = self.tx.subscribe();
        if !self.triggered.load(Ordering::Acquire) {
            return rx;
        }
        let (tx, rx) = broadcast::channel(1);
        let _ = tx.send(());
        rx
    }

    /// 发送关闭信号，返回这次调用是否真正触发了关闭
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            debug!("关闭信号已经发送过");
            return false;
        }
        let receivers = self.tx.send(()).unwrap_or(0);
        info!("关闭信号已发送给 {} 个组件", receivers);
        true
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_every_subscriber_is_notified_once() {
        let signal = ShutdownSignal::new();
        let mut server = signal.subscribe();
        let mut sweeper = signal.clone().subscribe();

        assert!(signal.trigger());
        assert!(!signal.trigger());

        assert!(timeout(Duration::from_millis(100), server.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), sweeper.recv()).await.is_ok());
        assert!(server.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_signal_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let mut rx = signal.subscribe();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_untriggered_signal_stays_pending() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        assert!(timeout(Duration::from_millis(20), rx.recv()).await.is_err());
    }
}
