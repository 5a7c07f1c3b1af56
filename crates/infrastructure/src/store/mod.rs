pub mod in_memory_store;
pub mod sqlite_task_set_store;

pub use in_memory_store::InMemoryTaskSetStore;
pub use sqlite_task_set_store::SqliteTaskSetStore;

use std::sync::Arc;

use gateway_domain::TaskSetStore;
use gateway_errors::{GatewayError, GatewayResult};

/// 存储后端类型
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn parse(value: &str) -> GatewayResult<Self> {
        match value {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(GatewayError::config_error(format!(
                "不支持的存储后端: {other}"
            ))),
        }
    }
}

/// 根据后端类型创建任务集存储
pub async fn create_task_set_store(
    backend: &StoreBackend,
    url: &str,
    max_connections: u32,
) -> GatewayResult<Arc<dyn TaskSetStore>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryTaskSetStore::new())),
        StoreBackend::Sqlite => {
            let store = SqliteTaskSetStore::connect(url, max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
