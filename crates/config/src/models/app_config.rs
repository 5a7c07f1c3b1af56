use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    gateway::{MetricsConfig, RpcConfig, ServerConfig, StoreConfig},
    minion::MinionConfig,
};
use crate::validation::ConfigValidator;

/// 环境变量前缀，例如 `GATEWAY_SERVER__BIND_ADDRESS`
pub const ENV_PREFIX: &str = "GATEWAY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    pub minion: MinionConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/gateway.toml",
                "gateway.toml",
                "/etc/minion-gateway/config.toml",
            ];

            let mut config_file_found = false;
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    config_file_found = true;
                    break;
                }
            }

            if !config_file_found {
                let defaults = AppConfig::default();
                builder = builder
                    .set_default("server.bind_address", defaults.server.bind_address)?
                    .set_default("server.max_frame_bytes", defaults.server.max_frame_bytes as u64)?
                    .set_default("rpc.default_ttl_ms", defaults.rpc.default_ttl_ms)?
                    .set_default("rpc.sweep_interval_ms", defaults.rpc.sweep_interval_ms)?
                    .set_default("store.backend", defaults.store.backend)?
                    .set_default("store.url", defaults.store.url)?
                    .set_default("store.max_connections", defaults.store.max_connections as u64)?
                    .set_default("metrics.enabled", defaults.metrics.enabled)?
                    .set_default(
                        "metrics.prometheus_bind_address",
                        defaults.metrics.prometheus_bind_address,
                    )?
                    .set_default("metrics.prefix", defaults.metrics.prefix)?
                    .set_default("minion.gateway_address", defaults.minion.gateway_address)?
                    .set_default("minion.tenant_id", defaults.minion.tenant_id)?
                    .set_default("minion.location", defaults.minion.location)?
                    .set_default("minion.reconnect_delay_ms", defaults.minion.reconnect_delay_ms)?;
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.server.validate()?;
        self.rpc.validate()?;
        self.store.validate()?;
        self.metrics.validate()?;
        self.minion.validate()?;
        Ok(())
    }
}
