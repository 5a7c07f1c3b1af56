//! 任务集发布
//!
//! 每次发布先持久化，再通知孪生同步层。同一个租户位置上的读改写和随后的通知
//! 在该键的锁内完成，保证并发的增量发布不会丢失任何一方的追加，并且通知的
//! 版本顺序与存储写入顺序一致。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gateway_domain::{
    TaskDefinition, TaskSet, TaskSetStore, TaskUpdate, TenantLocationKey, TwinUpdate,
    UpdateSummary,
};
use gateway_errors::GatewayResult;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument};

use crate::twin::{SnapshotSource, TwinSynchronizer};

pub struct TaskSetPublisher {
    store: Arc<dyn TaskSetStore>,
    twin: Arc<TwinSynchronizer>,
    key_locks: Mutex<HashMap<TenantLocationKey, Arc<AsyncMutex<()>>>>,
}

impl TaskSetPublisher {
    pub fn new(store: Arc<dyn TaskSetStore>, twin: Arc<TwinSynchronizer>) -> Self {
        Self {
            store,
            twin,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn validated_key(tenant_id: &str, location: &str) -> GatewayResult<TenantLocationKey> {
        let key = TenantLocationKey::new(tenant_id, location);
        key.validate()?;
        Ok(key)
    }

    fn key_lock(&self, key: &TenantLocationKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// 没有其他任务持有或等待该键的锁时把它从表中移除
    fn release_key_lock(&self, key: &TenantLocationKey, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        // 表里一份加上这里一份
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    pub fn locked_key_count(&self) -> usize {
        self.key_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 覆盖存储的任务集并推送完整快照，返回孪生版本号
    #[instrument(skip(self, task_set), fields(tasks = task_set.len()))]
    pub async fn publish_full(
        &self,
        tenant_id: &str,
        location: &str,
        task_set: TaskSet,
    ) -> GatewayResult<u64> {
        let key = Self::validated_key(tenant_id, location)?;
        let payload = task_set.to_bytes()?;

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.store_and_publish_full(&key, &task_set, payload).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn store_and_publish_full(
        &self,
        key: &TenantLocationKey,
        task_set: &TaskSet,
        payload: Vec<u8>,
    ) -> GatewayResult<u64> {
        self.store.put(key, task_set).await?;
        let version = self
            .twin
            .publish(&key.twin_key(), TwinUpdate::Full(payload))
            .await;

        info!("发布任务集 {}，共 {} 个任务，版本 v{}", key, task_set.len(), version);
        Ok(version)
    }

    /// 把新任务追加到现有任务集，只向订阅者推送新增部分
    #[instrument(skip(self, new_definitions), fields(tasks = new_definitions.len()))]
    pub async fn publish_incremental(
        &self,
        tenant_id: &str,
        location: &str,
        new_definitions: Vec<TaskDefinition>,
    ) -> GatewayResult<u64> {
        let key = Self::validated_key(tenant_id, location)?;

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.append_and_publish(&key, new_definitions).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn append_and_publish(
        &self,
        key: &TenantLocationKey,
        new_definitions: Vec<TaskDefinition>,
    ) -> GatewayResult<u64> {
        let twin_key = key.twin_key();
        let mut task_set = self.store.get(key).await?.unwrap_or_default();
        // 孪生层还没有这个键时，用写入前的状态做基线，补丁才能接得上
        self.twin.prime(&twin_key, task_set.to_bytes()?).await;

        task_set.append(&new_definitions);
        let delta = TaskSet::new(new_definitions).to_bytes()?;
        let snapshot = task_set.to_bytes()?;

        self.store.put(key, &task_set).await?;
        let version = self
            .twin
            .publish(&twin_key, TwinUpdate::Patch { delta, snapshot })
            .await;

        info!("向任务集 {} 追加任务，当前共 {} 个，版本 v{}", key, task_set.len(), version);
        Ok(version)
    }

    /// 按任务ID增删任务：先删后增，已存在的ID原位替换
    ///
    /// 没有实际变化时不写存储也不推送。有变化时推送完整任务集，
    /// 因为删除无法表达为追加补丁。
    #[instrument(skip(self, updates), fields(updates = updates.len()))]
    pub async fn update_tasks(
        &self,
        tenant_id: &str,
        location: &str,
        updates: &[TaskUpdate],
    ) -> GatewayResult<UpdateSummary> {
        let key = Self::validated_key(tenant_id, location)?;

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.apply_and_publish(&key, updates).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn apply_and_publish(
        &self,
        key: &TenantLocationKey,
        updates: &[TaskUpdate],
    ) -> GatewayResult<UpdateSummary> {
        let mut task_set = self.store.get(key).await?.unwrap_or_default();
        let summary = task_set.apply_updates(updates);
        if summary.is_empty() {
            debug!("任务集 {} 没有变化，跳过发布", key);
            return Ok(summary);
        }

        let payload = task_set.to_bytes()?;
        self.store.put(key, &task_set).await?;
        let version = self
            .twin
            .publish(&key.twin_key(), TwinUpdate::Full(payload))
            .await;

        info!(
            "更新任务集 {}: 新增 {}，替换 {}，删除 {}，版本 v{}",
            key, summary.num_new, summary.num_replaced, summary.num_removed, version
        );
        Ok(summary)
    }

    pub async fn fetch(&self, tenant_id: &str, location: &str) -> GatewayResult<Option<TaskSet>> {
        self.store
            .get(&TenantLocationKey::new(tenant_id, location))
            .await
    }
}

/// 以任务集存储作为孪生快照来源
pub struct StoreSnapshotSource {
    store: Arc<dyn TaskSetStore>,
}

impl StoreSnapshotSource {
    pub fn new(store: Arc<dyn TaskSetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SnapshotSource for StoreSnapshotSource {
    async fn load_snapshot(&self, key: &str) -> GatewayResult<Option<Vec<u8>>> {
        let Some(key) = TenantLocationKey::from_twin_key(key) else {
            return Ok(None);
        };
        match self.store.get(&key).await? {
            Some(task_set) => Ok(Some(task_set.to_bytes()?)),
            None => Ok(None),
        }
    }
}
