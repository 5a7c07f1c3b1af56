use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 追踪信息中携带发布批次ID的键
pub const TRACE_ID_KEY: &str = "trace-id";

/// 一条孪生状态同步消息
///
/// 同一 (key, session_id) 下版本号严格递增。收到补丁的消费者必须在同一会话内
/// 先收到过更低版本的完整快照，否则需要请求全量重同步。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinObject {
    pub key: String,
    pub version: u64,
    pub is_patch: bool,
    #[serde(with = "crate::encoding")]
    pub payload: Vec<u8>,
    pub session_id: String,
    #[serde(default)]
    pub tracing_info: HashMap<String, String>,
}

impl TwinObject {
    pub fn trace_id(&self) -> Option<&str> {
        self.tracing_info.get(TRACE_ID_KEY).map(String::as_str)
    }
}

/// 发布到孪生同步层的一次更新
#[derive(Debug, Clone, PartialEq)]
pub enum TwinUpdate {
    /// 完整状态，替换当前快照
    Full(Vec<u8>),
    /// 增量补丁；`snapshot` 是应用补丁后的完整状态，供后续订阅者获取快照
    Patch { delta: Vec<u8>, snapshot: Vec<u8> },
}

impl TwinUpdate {
    pub fn is_patch(&self) -> bool {
        matches!(self, TwinUpdate::Patch { .. })
    }

    /// 下发给监听者的载荷
    pub fn delivered_payload(&self) -> &[u8] {
        match self {
            TwinUpdate::Full(payload) => payload,
            TwinUpdate::Patch { delta, .. } => delta,
        }
    }

    /// 更新之后的完整状态
    pub fn into_snapshot(self) -> Vec<u8> {
        match self {
            TwinUpdate::Full(payload) => payload,
            TwinUpdate::Patch { snapshot, .. } => snapshot,
        }
    }
}
