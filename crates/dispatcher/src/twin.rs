//! 孪生状态同步
//!
//! 按键维护版本号、最近的完整快照和订阅者列表。同一个键上的发布和订阅在该键的
//! 异步锁内串行执行，因此每个 (key, session) 观察到的版本严格递增；不同键之间
//! 互不阻塞。会话表记录 session_id 到已订阅键的映射，会话失效时据此显式清理。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gateway_domain::{TwinObject, TwinUpdate, TRACE_ID_KEY};
use gateway_errors::GatewayResult;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 接收孪生消息的订阅者，一般对应一条Minion连接
pub trait TwinListener: Send + Sync {
    fn deliver(&self, object: TwinObject) -> GatewayResult<()>;
}

/// 内存中没有某个键的状态时，从这里加载权威快照
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load_snapshot(&self, key: &str) -> GatewayResult<Option<Vec<u8>>>;
}

struct Subscription {
    session_id: String,
    listener: Arc<dyn TwinListener>,
}

#[derive(Default)]
struct KeyState {
    initialized: bool,
    version: u64,
    snapshot: Vec<u8>,
    subscriptions: Vec<Subscription>,
}

impl KeyState {
    fn full_object(&self, key: &str, session_id: &str) -> TwinObject {
        TwinObject {
            key: key.to_string(),
            version: self.version,
            is_patch: false,
            payload: self.snapshot.clone(),
            session_id: session_id.to_string(),
            tracing_info: HashMap::new(),
        }
    }
}

pub struct TwinSynchronizer {
    // 没有订阅者的键也保留，版本号和快照要跨订阅延续；条目数以租户位置数为界
    keys: Mutex<HashMap<String, Arc<AsyncMutex<KeyState>>>>,
    sessions: Mutex<HashMap<String, HashSet<String>>>,
    snapshot_source: Option<Arc<dyn SnapshotSource>>,
}

impl TwinSynchronizer {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            snapshot_source: None,
        }
    }

    pub fn with_snapshot_source(snapshot_source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            snapshot_source: Some(snapshot_source),
            ..Self::new()
        }
    }

    fn key_state(&self, key: &str) -> Arc<AsyncMutex<KeyState>> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(keys.entry(key.to_string()).or_default())
    }

    fn existing_key_state(&self, key: &str) -> Option<Arc<AsyncMutex<KeyState>>> {
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.get(key).cloned()
    }

    async fn ensure_initialized(&self, key: &str, state: &mut KeyState) -> GatewayResult<()> {
        if state.initialized {
            return Ok(());
        }
        if let Some(source) = &self.snapshot_source {
            if let Some(snapshot) = source.load_snapshot(key).await? {
                debug!("从快照源加载孪生状态: {}", key);
                state.snapshot = snapshot;
            }
        }
        state.initialized = true;
        Ok(())
    }

    /// 键尚未加载时，用调用方给出的当前状态初始化它
    ///
    /// 发布方在写入存储之前调用，保证此后订阅者拿到的快照与随后的补丁衔接。
    pub async fn prime(&self, key: &str, snapshot: Vec<u8>) {
        let state = self.key_state(key);
        let mut state = state.lock().await;
        if !state.initialized {
            state.snapshot = snapshot;
            state.initialized = true;
        }
    }

    /// 发布一次更新，返回新的版本号
    pub async fn publish(&self, key: &str, update: TwinUpdate) -> u64 {
        let state = self.key_state(key);
        let mut state = state.lock().await;

        state.version += 1;
        state.initialized = true;
        let version = state.version;
        let is_patch = update.is_patch();

        let mut tracing_info = HashMap::new();
        tracing_info.insert(TRACE_ID_KEY.to_string(), Uuid::new_v4().to_string());

        let payload = update.delivered_payload().to_vec();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|subscription| {
            let object = TwinObject {
                key: key.to_string(),
                version,
                is_patch,
                payload: payload.clone(),
                session_id: subscription.session_id.clone(),
                tracing_info: tracing_info.clone(),
            };
            match subscription.listener.deliver(object) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "向会话 {} 投递孪生消息 {} v{} 失败，移除该订阅: {}",
                        subscription.session_id, key, version, e
                    );
                    false
                }
            }
        });
        let delivered = state.subscriptions.len();

        state.snapshot = update.into_snapshot();

        debug!(
            "发布孪生更新 {} v{} (patch={}), 投递 {}/{} 个订阅者",
            key, version, is_patch, delivered, before
        );
        version
    }

    /// 订阅一个键：先投递当前完整快照，再登记后续更新
    pub async fn subscribe(
        &self,
        key: &str,
        session_id: &str,
        listener: Arc<dyn TwinListener>,
    ) -> GatewayResult<u64> {
        let state = self.key_state(key);
        let mut state = state.lock().await;
        self.ensure_initialized(key, &mut state).await?;

        listener.deliver(state.full_object(key, session_id))?;
        state.subscriptions.push(Subscription {
            session_id: session_id.to_string(),
            listener,
        });

        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string());

        info!("会话 {} 订阅孪生键 {}，当前版本 v{}", session_id, key, state.version);
        Ok(state.version)
    }

    /// 向指定会话重新发送一次完整快照，不改变订阅关系
    ///
    /// 快照沿用当前版本号而不递增，是同一会话内版本严格递增的唯一例外：
    /// 接收端把同版本的完整快照当作新基线，之后的补丁从 v+1 接续。
    pub async fn send_snapshot(
        &self,
        key: &str,
        session_id: &str,
        listener: &dyn TwinListener,
    ) -> GatewayResult<u64> {
        let state = self.key_state(key);
        let mut state = state.lock().await;
        self.ensure_initialized(key, &mut state).await?;

        listener.deliver(state.full_object(key, session_id))?;
        debug!("向会话 {} 重发孪生快照 {} v{}", session_id, key, state.version);
        Ok(state.version)
    }

    /// 移除某个会话的全部订阅，返回移除的订阅数
    pub async fn on_session_invalidated(&self, session_id: &str) -> usize {
        let keys = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .unwrap_or_default();

        let mut removed = 0;
        for key in keys {
            if let Some(state) = self.existing_key_state(&key) {
                let mut state = state.lock().await;
                let before = state.subscriptions.len();
                state
                    .subscriptions
                    .retain(|subscription| subscription.session_id != session_id);
                removed += before - state.subscriptions.len();
            }
        }

        if removed > 0 {
            info!("会话 {} 失效，移除 {} 个孪生订阅", session_id, removed);
        }
        removed
    }

    pub async fn current_version(&self, key: &str) -> Option<u64> {
        let state = self.existing_key_state(key)?;
        let state = state.lock().await;
        state.initialized.then_some(state.version)
    }

    pub async fn subscriber_count(&self, key: &str) -> usize {
        match self.existing_key_state(key) {
            Some(state) => state.lock().await.subscriptions.len(),
            None => 0,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for TwinSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}
