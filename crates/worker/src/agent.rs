//! Minion代理
//!
//! 与连接无关的Minion逻辑：跟踪任务集孪生状态、执行RPC请求。
//! 返回值是需要回送给网关的消息，由客户端负责写出。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use gateway_domain::{
    GatewayMessage, MinionIdentity, MinionMessage, RpcRequest, RpcResponse, TaskSet, TwinObject,
    METADATA_LOCATION, METADATA_TENANT_ID,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::modules::ModuleRegistry;
use crate::twin_tracker::{TwinApplyOutcome, TwinTracker};

pub struct MinionAgent {
    identity: MinionIdentity,
    tracker: Mutex<TwinTracker<TaskSet>>,
    task_set_tx: watch::Sender<TaskSet>,
    modules: Arc<ModuleRegistry>,
}

impl MinionAgent {
    pub fn new(identity: MinionIdentity, modules: Arc<ModuleRegistry>) -> Self {
        let twin_key = identity.tenant_location().twin_key();
        let (task_set_tx, _) = watch::channel(TaskSet::default());
        Self {
            identity,
            tracker: Mutex::new(TwinTracker::new(twin_key)),
            task_set_tx,
            modules,
        }
    }

    pub fn identity(&self) -> &MinionIdentity {
        &self.identity
    }

    pub fn hello(&self) -> MinionMessage {
        MinionMessage::Hello(self.identity.clone())
    }

    /// 任务集变化通知
    pub fn task_sets(&self) -> watch::Receiver<TaskSet> {
        self.task_set_tx.subscribe()
    }

    pub fn current_task_set(&self) -> TaskSet {
        self.task_set_tx.borrow().clone()
    }

    /// 分发一条网关消息，返回需要回送的消息
    pub async fn handle_message(&self, message: GatewayMessage) -> Option<MinionMessage> {
        match message {
            GatewayMessage::Twin(object) => self.apply_twin(&object),
            GatewayMessage::RpcRequest { metadata, request } => {
                self.execute_rpc(&metadata, request).await
            }
        }
    }

    /// 应用孪生消息；需要全量重同步时返回请求消息
    pub fn apply_twin(&self, object: &TwinObject) -> Option<MinionMessage> {
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = tracker.apply(object);
        let resync = MinionMessage::TwinRequest {
            key: tracker.key().to_string(),
        };

        match outcome {
            Ok(TwinApplyOutcome::Applied { version }) => {
                let task_set = tracker.state().clone();
                info!(
                    "任务集更新到 v{} (patch={})，共 {} 个任务",
                    version,
                    object.is_patch,
                    task_set.len()
                );
                self.task_set_tx.send_replace(task_set);
                None
            }
            Ok(TwinApplyOutcome::Ignored) => {
                debug!("忽略孪生消息 {} v{}", object.key, object.version);
                None
            }
            Ok(TwinApplyOutcome::NeedsResync) => {
                warn!(
                    "孪生消息 {} v{} 无法衔接当前状态，请求全量同步",
                    object.key, object.version
                );
                Some(resync)
            }
            Err(e) => {
                warn!("孪生消息 {} v{} 解码失败: {}", object.key, object.version, e);
                Some(resync)
            }
        }
    }

    /// 执行RPC请求；过期、目标不符或模块未知的请求直接丢弃
    pub async fn execute_rpc(
        &self,
        metadata: &HashMap<String, String>,
        request: RpcRequest,
    ) -> Option<MinionMessage> {
        let now = Utc::now();
        if request.is_expired_at(now) {
            warn!("丢弃已过期的RPC请求 {}", request.id);
            return None;
        }
        if request.module.is_empty() {
            warn!("丢弃未指定模块的RPC请求 {}", request.id);
            return None;
        }
        if metadata
            .get(METADATA_TENANT_ID)
            .is_some_and(|tenant| tenant != &self.identity.tenant_id)
            || metadata
                .get(METADATA_LOCATION)
                .is_some_and(|location| location != &self.identity.location)
        {
            warn!("丢弃发往其他租户或位置的RPC请求 {}", request.id);
            return None;
        }
        if request
            .system_id
            .as_ref()
            .is_some_and(|system_id| system_id != &self.identity.system_id)
        {
            warn!("丢弃发往其他Minion的RPC请求 {}", request.id);
            return None;
        }

        let Some(module) = self.modules.get(&request.module).await else {
            warn!("没有注册RPC模块 {}，丢弃请求 {}", request.module, request.id);
            return None;
        };

        let ttl = request.remaining_ttl(now);
        match tokio::time::timeout(ttl, module.execute(&request)).await {
            Ok(Ok(payload)) => Some(MinionMessage::RpcResponse(RpcResponse::new(
                request.id,
                request.module,
                payload,
            ))),
            Ok(Err(e)) => {
                warn!("RPC模块 {} 执行请求 {} 失败: {}", request.module, request.id, e);
                None
            }
            Err(_) => {
                warn!("RPC模块 {} 执行请求 {} 超时", request.module, request.id);
                None
            }
        }
    }
}
