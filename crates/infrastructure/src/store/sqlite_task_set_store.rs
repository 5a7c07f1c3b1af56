use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use gateway_domain::{TaskSet, TaskSetStore, TenantLocationKey};
use gateway_errors::{GatewayError, GatewayResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// 基于SQLite的任务集存储，每个租户位置一行记录
pub struct SqliteTaskSetStore {
    pool: SqlitePool,
}

impl SqliteTaskSetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接数据库；内存数据库只能使用单个连接，否则每个连接各自是一份独立的库
    pub async fn connect(url: &str, max_connections: u32) -> GatewayResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| GatewayError::config_error(format!("无效的SQLite URL {url}: {e}")))?
            .create_if_missing(true);

        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            // 连接被回收时内存库随之丢失
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(max_connections.max(1));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::store_unavailable(format!("连接SQLite失败: {e}")))?;

        Ok(Self::new(pool))
    }

    /// 创建任务集表
    pub async fn migrate(&self) -> GatewayResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_sets (
                tenant_id TEXT NOT NULL,
                location TEXT NOT NULL,
                task_set TEXT NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (tenant_id, location)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TaskSetStore for SqliteTaskSetStore {
    #[instrument(skip(self, task_set), fields(key = %key))]
    async fn put(&self, key: &TenantLocationKey, task_set: &TaskSet) -> GatewayResult<()> {
        let task_set_json = serde_json::to_string(task_set)
            .map_err(|e| GatewayError::Serialization(format!("序列化任务集失败: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO task_sets (tenant_id, location, task_set, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(tenant_id, location) DO UPDATE SET
                task_set = excluded.task_set,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.location)
        .bind(task_set_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("保存任务集成功: {}, 任务数 {}", key, task_set.len());
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &TenantLocationKey) -> GatewayResult<Option<TaskSet>> {
        let row = sqlx::query("SELECT task_set FROM task_sets WHERE tenant_id = $1 AND location = $2")
            .bind(&key.tenant_id)
            .bind(&key.location)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let task_set_json: String = row.try_get("task_set")?;
                let task_set = serde_json::from_str(&task_set_json).map_err(|e| {
                    GatewayError::store_unavailable(format!("任务集记录 {key} 已损坏: {e}"))
                })?;
                Ok(Some(task_set))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_domain::{TaskDefinition, TaskType};
    use std::sync::Arc;

    async fn setup_test_store() -> SqliteTaskSetStore {
        let store = SqliteTaskSetStore::connect("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn task_set(ids: &[&str]) -> TaskSet {
        TaskSet::new(
            ids.iter()
                .map(|id| {
                    TaskDefinition::new(*id, TaskType::Monitor, "ICMPMonitor")
                        .with_configuration(serde_json::json!({ "host": "127.0.0.1" }))
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = setup_test_store().await;
        let key = TenantLocationKey::new("t1", "loc1");

        assert!(store.get(&key).await.unwrap().is_none());

        let set = task_set(&["A", "B", "C"]);
        store.put(&key, &set).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(set));
    }

    #[tokio::test]
    async fn test_put_upserts_single_record() {
        let store = setup_test_store().await;
        let key = TenantLocationKey::new("t1", "loc1");

        store.put(&key, &task_set(&["A"])).await.unwrap();
        store.put(&key, &task_set(&["B", "C"])).await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) as count FROM task_sets")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .try_get("count")
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.get(&key).await.unwrap(), Some(task_set(&["B", "C"])));
    }

    #[tokio::test]
    async fn test_missing_table_surfaces_store_unavailable() {
        let store = SqliteTaskSetStore::connect("sqlite::memory:", 1).await.unwrap();
        let result = store.get(&TenantLocationKey::new("t1", "loc1")).await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_corrupt_record_surfaces_store_unavailable() {
        let store = setup_test_store().await;
        sqlx::query("INSERT INTO task_sets (tenant_id, location, task_set, updated_at) VALUES ('t1', 'loc1', 'garbage', '2024-01-01')")
            .execute(store.pool())
            .await
            .unwrap();

        let result = store.get(&TenantLocationKey::new("t1", "loc1")).await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tasks.db").display());
        let key = TenantLocationKey::new("t1", "loc1");

        {
            let store = SqliteTaskSetStore::connect(&url, 2).await.unwrap();
            store.migrate().await.unwrap();
            store.put(&key, &task_set(&["A"])).await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteTaskSetStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(task_set(&["A"])));
    }

    #[tokio::test]
    async fn test_concurrent_puts_leave_one_complete_set() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tasks.db").display());
        let store = Arc::new(SqliteTaskSetStore::connect(&url, 4).await.unwrap());
        store.migrate().await.unwrap();
        let key = TenantLocationKey::new("t1", "loc1");

        let sets: Vec<TaskSet> = (0..8)
            .map(|i| {
                let a = format!("A{i}");
                let b = format!("B{i}");
                task_set(&[a.as_str(), b.as_str()])
            })
            .collect();

        let mut handles = Vec::new();
        for set in sets.clone() {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                // 并发写入在SQLite忙时可能失败，这里只关心最终值的完整性
                let _ = store.put(&key, &set).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        if let Some(stored) = store.get(&key).await.unwrap() {
            assert!(sets.contains(&stored));
        }
    }
}
