use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 支持的任务集存储后端
pub const STORE_BACKENDS: [&str; 2] = ["memory", "sqlite"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8990".to_string(),
            max_frame_bytes: 4 * 1024 * 1024,
            worker_threads: None,
        }
    }
}

impl ConfigValidator for ServerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_socket_addr(&self.bind_address, "server.bind_address")?;
        if self.max_frame_bytes < 1024 {
            return Err(crate::ConfigError::Validation(
                "server.max_frame_bytes must be at least 1024".to_string(),
            ));
        }
        if let Some(worker_threads) = self.worker_threads {
            ValidationUtils::validate_count(worker_threads, "server.worker_threads")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub default_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl RpcConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 30_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl ConfigValidator for RpcConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_millis(self.default_ttl_ms, "rpc.default_ttl_ms")?;
        ValidationUtils::validate_millis(self.sweep_interval_ms, "rpc.sweep_interval_ms")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: String,
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            url: "sqlite://gateway.db".to_string(),
            max_connections: 5,
        }
    }
}

impl ConfigValidator for StoreConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_one_of(&self.backend, &STORE_BACKENDS, "store.backend")?;
        if self.backend == "sqlite" {
            ValidationUtils::validate_not_empty(&self.url, "store.url")?;
            if !self.url.starts_with("sqlite:") {
                return Err(crate::ConfigError::Validation(
                    "store.url must start with sqlite: when backend is sqlite".to_string(),
                ));
            }
        }
        ValidationUtils::validate_count(self.max_connections as usize, "store.max_connections")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub prometheus_bind_address: String,
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_bind_address: "0.0.0.0:9090".to_string(),
            prefix: "minion".to_string(),
        }
    }
}

impl ConfigValidator for MetricsConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.prefix, "metrics.prefix")?;
        if self.enabled {
            ValidationUtils::validate_socket_addr(
                &self.prometheus_bind_address,
                "metrics.prometheus_bind_address",
            )?;
        }
        Ok(())
    }
}
