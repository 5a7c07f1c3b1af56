use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 请求元数据中的租户键
pub const METADATA_TENANT_ID: &str = "tenant-id";
/// 请求元数据中的位置键
pub const METADATA_LOCATION: &str = "location";
/// Minion内置的回显模块
pub const ECHO_MODULE: &str = "echo";

/// 发往Minion的RPC请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    pub module: String,
    #[serde(with = "crate::encoding")]
    pub payload: Vec<u8>,
}

impl RpcRequest {
    /// 创建一个在 `ttl` 之后过期的请求
    pub fn new<L: Into<String>, M: Into<String>>(
        location: L,
        module: M,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            id: Uuid::new_v4(),
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            location: location.into(),
            system_id: None,
            module: module.into(),
            payload,
        }
    }

    pub fn with_system_id<S: Into<String>>(mut self, system_id: S) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 距离过期还剩的时间，已过期时为零
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// 随请求传输的旁路上下文
pub fn request_metadata(tenant_id: &str, location: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert(METADATA_TENANT_ID.to_string(), tenant_id.to_string());
    metadata.insert(METADATA_LOCATION.to_string(), location.to_string());
    metadata
}

/// Minion返回的RPC响应，只按 request_id 关联
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: Uuid,
    #[serde(default)]
    pub module: String,
    #[serde(with = "crate::encoding")]
    pub payload: Vec<u8>,
}

impl RpcResponse {
    pub fn new<M: Into<String>>(request_id: Uuid, module: M, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            module: module.into(),
            payload,
        }
    }
}
