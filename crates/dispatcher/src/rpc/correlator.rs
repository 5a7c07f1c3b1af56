//! RPC响应关联
//!
//! 挂起请求表按请求ID索引。响应、超时、连接断开三条路径都先在表锁内取出条目，
//! 再在锁外完成，因此每个请求恰好完成一次。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gateway_domain::{MinionIdentity, RpcResponse};
use gateway_errors::{GatewayError, GatewayResult};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{ConnectionId, RegistryListener};

pub type ResponseSender = oneshot::Sender<GatewayResult<RpcResponse>>;
pub type ResponseReceiver = oneshot::Receiver<GatewayResult<RpcResponse>>;

struct PendingRequestEntry {
    completion: ResponseSender,
    owner: MinionIdentity,
    connection_id: ConnectionId,
    deadline: Instant,
}

#[derive(Default)]
pub struct RpcResponseCorrelator {
    pending: Mutex<HashMap<Uuid, PendingRequestEntry>>,
}

impl RpcResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PendingRequestEntry>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记一个挂起请求，返回等待结果的接收端
    pub fn register(
        &self,
        request_id: Uuid,
        owner: MinionIdentity,
        connection_id: ConnectionId,
        deadline: Instant,
    ) -> GatewayResult<ResponseReceiver> {
        let mut pending = self.lock();
        if pending.contains_key(&request_id) {
            return Err(GatewayError::Internal(format!(
                "重复的RPC请求ID: {request_id}"
            )));
        }
        let (completion, receiver) = oneshot::channel();
        pending.insert(
            request_id,
            PendingRequestEntry {
                completion,
                owner,
                connection_id,
                deadline,
            },
        );
        Ok(receiver)
    }

    /// 处理一条响应
    ///
    /// 找不到挂起请求时返回 `StaleOrUnknownResponse`，调用方只记录不上报。
    /// 在截止时间当时或之后到达的响应让请求以超时结束。
    pub fn on_response(&self, response: RpcResponse) -> GatewayResult<()> {
        let request_id = response.request_id;
        let Some(entry) = self.lock().remove(&request_id) else {
            debug!("丢弃未匹配的RPC响应: {}", request_id);
            return Err(GatewayError::StaleOrUnknownResponse { request_id });
        };

        if Instant::now() >= entry.deadline {
            debug!("RPC响应 {} 到达时已过期", request_id);
            let _ = entry
                .completion
                .send(Err(GatewayError::RequestTimedOut { request_id }));
            return Err(GatewayError::StaleOrUnknownResponse { request_id });
        }

        if entry.completion.send(Ok(response)).is_err() {
            debug!("RPC请求 {} 的调用方已放弃等待", request_id);
        }
        Ok(())
    }

    /// 直接移除挂起请求，不通知调用方
    pub fn remove(&self, request_id: &Uuid) -> bool {
        self.lock().remove(request_id).is_some()
    }

    /// 让请求以超时结束，返回条目是否仍在
    pub fn time_out(&self, request_id: &Uuid) -> bool {
        match self.lock().remove(request_id) {
            Some(entry) => {
                let _ = entry.completion.send(Err(GatewayError::RequestTimedOut {
                    request_id: *request_id,
                }));
                true
            }
            None => false,
        }
    }

    /// 取消某个连接上的全部挂起请求
    pub fn fail_connection(&self, owner: &MinionIdentity, connection_id: ConnectionId) -> usize {
        let failed: Vec<(Uuid, PendingRequestEntry)> = {
            let mut pending = self.lock();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, entry)| entry.connection_id == connection_id && &entry.owner == owner)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = failed.len();
        for (request_id, entry) in failed {
            let _ = entry.completion.send(Err(GatewayError::MinionDisconnected {
                request_id,
                system_id: entry.owner.system_id.clone(),
            }));
        }
        if count > 0 {
            warn!("Minion {} 断开，取消 {} 个挂起的RPC请求", owner, count);
        }
        count
    }

    /// 让所有已过截止时间的请求以超时结束
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let expired: Vec<(Uuid, PendingRequestEntry)> = {
            let mut pending = self.lock();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, entry)| now >= entry.deadline)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (request_id, entry) in expired {
            let _ = entry
                .completion
                .send(Err(GatewayError::RequestTimedOut { request_id }));
        }
        if count > 0 {
            debug!("清理 {} 个超时的RPC请求", count);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_pending(&self, request_id: &Uuid) -> bool {
        self.lock().contains_key(request_id)
    }

    /// 周期性清理过期请求，直到收到关闭信号
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("启动RPC过期清理任务，间隔 {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.expire_overdue(Instant::now());
                }
                _ = shutdown_rx.recv() => {
                    info!("RPC过期清理任务收到关闭信号");
                    break;
                }
            }
        }
    }
}

impl RegistryListener for RpcResponseCorrelator {
    fn on_connection_closed(&self, identity: &MinionIdentity, connection_id: ConnectionId) {
        self.fail_connection(identity, connection_id);
    }
}
