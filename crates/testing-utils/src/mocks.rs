//! Mock implementations for the gateway port traits
//!
//! 这些实现全部在内存中运行，用于不需要真实连接或数据库的单元测试。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gateway_domain::{
    GatewayMessage, MetricsForwarder, MinionTransport, RpcRequest, Sample, TaskSet, TaskSetStore,
    TenantLocationKey, TwinObject,
};
use gateway_errors::{GatewayError, GatewayResult};
use gateway_infrastructure::InMemoryTaskSetStore;

/// 记录所有发送消息的传输替身
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<GatewayMessage>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的发送全部失败，但连接不标记为关闭
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<GatewayMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_twins(&self) -> Vec<TwinObject> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                GatewayMessage::Twin(twin) => Some(twin),
                _ => None,
            })
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<RpcRequest> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                GatewayMessage::RpcRequest { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MinionTransport for RecordingTransport {
    fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        if self.is_closed() || self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::transport_error("连接已关闭"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

/// 可以切换为故障状态的任务集存储
#[derive(Default)]
pub struct FlakyTaskSetStore {
    inner: InMemoryTaskSetStore,
    failing: AtomicBool,
}

impl FlakyTaskSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> GatewayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::store_unavailable("模拟存储故障"));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskSetStore for FlakyTaskSetStore {
    async fn put(&self, key: &TenantLocationKey, task_set: &TaskSet) -> GatewayResult<()> {
        self.check()?;
        self.inner.put(key, task_set).await
    }

    async fn get(&self, key: &TenantLocationKey) -> GatewayResult<Option<TaskSet>> {
        self.check()?;
        self.inner.get(key).await
    }
}

/// 记录收到样本的指标转发器
#[derive(Debug, Clone, Default)]
pub struct RecordingForwarder {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsForwarder for RecordingForwarder {
    async fn forward(&self, samples: Vec<Sample>) -> GatewayResult<()> {
        self.samples.lock().unwrap().extend(samples);
        Ok(())
    }
}
