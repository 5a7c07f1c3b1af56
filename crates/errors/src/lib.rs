use thiserror::Error;
use uuid::Uuid;

/// 入站消息解码错误
///
/// 单条消息解码失败只丢弃该消息，不会关闭所在连接。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("消息帧长度 {length} 超过上限 {max}")]
    FrameTooLarge { length: usize, max: usize },
    #[error("消息内容无法解析: {0}")]
    InvalidPayload(String),
    #[error("握手之前收到消息: {0}")]
    UnexpectedMessage(String),
}

impl DecodeError {
    pub fn invalid_payload<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPayload(msg.into())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::InvalidPayload(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("任务集存储不可用: {0}")]
    StoreUnavailable(String),
    #[error("没有可用的路由: location={location}, system_id={}", .system_id.as_deref().unwrap_or("*"))]
    NoRouteAvailable {
        location: String,
        system_id: Option<String>,
    },
    #[error("RPC请求超时: {request_id}")]
    RequestTimedOut { request_id: Uuid },
    #[error("Minion连接已断开: {system_id}, 请求 {request_id} 被取消")]
    MinionDisconnected { request_id: Uuid, system_id: String },
    #[error("未匹配的RPC响应: {request_id}")]
    StaleOrUnknownResponse { request_id: Uuid },
    #[error("解码错误: {0}")]
    Decode(#[from] DecodeError),
    #[error("传输通道错误: {0}")]
    Transport(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }
    pub fn no_route<S: Into<String>>(location: S, system_id: Option<String>) -> Self {
        Self::NoRouteAvailable {
            location: location.into(),
            system_id,
        }
    }
    pub fn transport_error<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Internal(_) | GatewayError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::StoreUnavailable(_)
                | GatewayError::RequestTimedOut { .. }
                | GatewayError::MinionDisconnected { .. }
                | GatewayError::Transport(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            GatewayError::StoreUnavailable(_) => "任务集存储暂不可用，请稍后重试",
            GatewayError::NoRouteAvailable { .. } => "目标位置没有在线的Minion",
            GatewayError::RequestTimedOut { .. } => "Minion响应超时",
            GatewayError::MinionDisconnected { .. } => "Minion连接已断开",
            GatewayError::ValidationError(_) => "输入数据验证失败",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::StoreUnavailable(err.to_string())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
