use std::collections::HashMap;

use async_trait::async_trait;
use gateway_domain::{TaskSet, TaskSetStore, TenantLocationKey};
use gateway_errors::GatewayResult;
use tokio::sync::RwLock;
use tracing::debug;

/// 进程内任务集存储
#[derive(Debug, Default)]
pub struct InMemoryTaskSetStore {
    task_sets: RwLock<HashMap<TenantLocationKey, TaskSet>>,
}

impl InMemoryTaskSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.task_sets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.task_sets.read().await.is_empty()
    }
}

#[async_trait]
impl TaskSetStore for InMemoryTaskSetStore {
    async fn put(&self, key: &TenantLocationKey, task_set: &TaskSet) -> GatewayResult<()> {
        self.task_sets
            .write()
            .await
            .insert(key.clone(), task_set.clone());
        debug!("保存任务集成功: {}, 任务数 {}", key, task_set.len());
        Ok(())
    }

    async fn get(&self, key: &TenantLocationKey) -> GatewayResult<Option<TaskSet>> {
        Ok(self.task_sets.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_domain::{TaskDefinition, TaskType};

    #[tokio::test]
    async fn test_put_replaces_existing_set() {
        let store = InMemoryTaskSetStore::new();
        let key = TenantLocationKey::new("t1", "loc1");

        let first = TaskSet::new(vec![TaskDefinition::new("A", TaskType::Monitor, "ICMP")]);
        let second = TaskSet::new(vec![TaskDefinition::new("B", TaskType::Monitor, "SNMP")]);

        store.put(&key, &first).await.unwrap();
        store.put(&key, &second).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(second));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let store = InMemoryTaskSetStore::new();
        let set = TaskSet::new(vec![TaskDefinition::new("A", TaskType::Monitor, "ICMP")]);
        store
            .put(&TenantLocationKey::new("t1", "loc1"), &set)
            .await
            .unwrap();

        assert!(store
            .get(&TenantLocationKey::new("t2", "loc1"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get(&TenantLocationKey::new("t1", "Loc1"))
            .await
            .unwrap()
            .is_none());
    }
}
