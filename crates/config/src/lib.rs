pub mod models;
pub mod validation;

pub use models::{
    AppConfig, MetricsConfig, MinionConfig, RpcConfig, ServerConfig, StoreConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置校验失败；文件读取和解析错误由加载器以 anyhow 上下文返回
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置校验失败: {0}")]
    Validation(String),
}
