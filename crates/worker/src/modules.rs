//! Minion端的RPC模块注册表
//!
//! 模块按ID注册，收到请求时按 `module` 字段查表分发。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_domain::{RpcRequest, ECHO_MODULE};
use gateway_errors::GatewayResult;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 处理某一类RPC请求的模块
#[async_trait]
pub trait RpcModule: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self, request: &RpcRequest) -> GatewayResult<Vec<u8>>;
}

/// 原样返回请求载荷
#[derive(Debug, Default)]
pub struct EchoModule;

#[async_trait]
impl RpcModule for EchoModule {
    fn id(&self) -> &str {
        ECHO_MODULE
    }

    async fn execute(&self, request: &RpcRequest) -> GatewayResult<Vec<u8>> {
        Ok(request.payload.clone())
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<dyn RpcModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只包含内置回显模块的注册表
    pub async fn with_defaults() -> Self {
        let registry = Self::new();
        registry.bind(Arc::new(EchoModule)).await;
        registry
    }

    /// 注册模块；ID已被占用时保留原有模块并返回 false
    pub async fn bind(&self, module: Arc<dyn RpcModule>) -> bool {
        let mut modules = self.modules.write().await;
        let id = module.id().to_string();
        if modules.contains_key(&id) {
            warn!("RPC模块 {} 已注册，忽略重复注册", id);
            return false;
        }
        info!("注册RPC模块 {}", id);
        modules.insert(id, module);
        true
    }

    pub async fn unbind(&self, id: &str) -> bool {
        self.modules.write().await.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn RpcModule>> {
        self.modules.read().await.get(id).cloned()
    }

    pub async fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedModule(&'static str, &'static [u8]);

    #[async_trait]
    impl RpcModule for FixedModule {
        fn id(&self) -> &str {
            self.0
        }

        async fn execute(&self, _request: &RpcRequest) -> GatewayResult<Vec<u8>> {
            Ok(self.1.to_vec())
        }
    }

    #[tokio::test]
    async fn test_echo_returns_payload() {
        let request = RpcRequest::new("loc1", ECHO_MODULE, b"hi".to_vec(), Duration::from_secs(1));
        assert_eq!(EchoModule.execute(&request).await.unwrap(), b"hi".to_vec());
    }

    #[tokio::test]
    async fn test_duplicate_bind_keeps_first_module() {
        let registry = ModuleRegistry::new();
        assert!(registry.bind(Arc::new(FixedModule("scan", b"first"))).await);
        assert!(!registry.bind(Arc::new(FixedModule("scan", b"second"))).await);

        let request = RpcRequest::new("loc1", "scan", vec![], Duration::from_secs(1));
        let module = registry.get("scan").await.unwrap();
        assert_eq!(module.execute(&request).await.unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn test_unbind_and_lookup() {
        let registry = ModuleRegistry::with_defaults().await;
        assert_eq!(registry.module_ids().await, vec![ECHO_MODULE.to_string()]);
        assert!(registry.unbind(ECHO_MODULE).await);
        assert!(!registry.unbind(ECHO_MODULE).await);
        assert!(registry.get(ECHO_MODULE).await.is_none());
    }
}
