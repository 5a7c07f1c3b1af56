//! 核心组件依赖的外部接口

use async_trait::async_trait;

use crate::{GatewayMessage, GatewayResult, Sample, TaskSet, TenantLocationKey};

/// 按租户位置存储任务集的持久化映射
///
/// `put` 对同一个键是原子的，不会暴露写了一半的任务集。
/// 存储层故障以 `StoreUnavailable` 返回，实现内部不重试。
#[async_trait]
pub trait TaskSetStore: Send + Sync {
    async fn put(&self, key: &TenantLocationKey, task_set: &TaskSet) -> GatewayResult<()>;
    async fn get(&self, key: &TenantLocationKey) -> GatewayResult<Option<TaskSet>>;
}

/// 一条到Minion的活动连接
pub trait MinionTransport: Send + Sync {
    /// 非阻塞地把消息放入连接的发送队列
    fn send(&self, message: GatewayMessage) -> GatewayResult<()>;
    /// 关闭连接，之后的发送都会失败
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// 外部指标存储
#[async_trait]
pub trait MetricsForwarder: Send + Sync {
    async fn forward(&self, samples: Vec<Sample>) -> GatewayResult<()>;
}
