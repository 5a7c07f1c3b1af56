use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ECHO类型的监控结果只用于连通性检查，不转发
pub const ECHO_MONITOR_TYPE: &str = "ECHO";

/// Minion上报的监控结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub location: String,
    pub system_id: String,
    pub monitor_type: String,
    #[serde(default)]
    pub node_id: Option<String>,
    pub status: String,
    pub response_time_ms: f64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Minion上报的服务发现结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub location: String,
    pub system_id: String,
    pub detector_type: String,
    #[serde(default)]
    pub node_id: Option<String>,
    pub detected: bool,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// 转发给外部指标存储的带标签样本
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new<N: Into<String>>(name: N, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            labels: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
