//! 网关与Minion之间的线协议消息

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{DetectorResult, MinionIdentity, MonitorResult, RpcRequest, RpcResponse, TwinObject};

/// 网关发往Minion的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Twin(TwinObject),
    RpcRequest {
        #[serde(default)]
        metadata: HashMap<String, String>,
        request: RpcRequest,
    },
}

impl GatewayMessage {
    pub fn message_type_str(&self) -> &'static str {
        match self {
            GatewayMessage::Twin(_) => "twin",
            GatewayMessage::RpcRequest { .. } => "rpc_request",
        }
    }
}

/// Minion发往网关的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MinionMessage {
    /// 连接建立后的第一条消息
    Hello(MinionIdentity),
    RpcResponse(RpcResponse),
    /// 请求指定键的全量快照
    TwinRequest { key: String },
    MonitorResult(MonitorResult),
    DetectorResult(DetectorResult),
}

impl MinionMessage {
    pub fn message_type_str(&self) -> &'static str {
        match self {
            MinionMessage::Hello(_) => "hello",
            MinionMessage::RpcResponse(_) => "rpc_response",
            MinionMessage::TwinRequest { .. } => "twin_request",
            MinionMessage::MonitorResult(_) => "monitor_result",
            MinionMessage::DetectorResult(_) => "detector_result",
        }
    }
}
