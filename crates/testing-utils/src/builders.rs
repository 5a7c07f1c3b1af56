//! Test data builders

use chrono::Utc;
use gateway_domain::{DetectorResult, MonitorResult, TaskDefinition, TaskSet, TaskType};
use std::collections::BTreeMap;

/// 以ID构造一个ICMP监控任务
pub fn task(id: &str) -> TaskDefinition {
    TaskDefinitionBuilder::new(id).build()
}

/// 以ID列表构造任务集
pub fn task_set(ids: &[&str]) -> TaskSet {
    TaskSet::new(ids.iter().map(|id| task(id)).collect())
}

pub struct TaskDefinitionBuilder {
    definition: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            definition: TaskDefinition::new(id, TaskType::Monitor, "ICMPMonitor")
                .with_schedule("60000")
                .with_configuration(serde_json::json!({ "host": "127.0.0.1" })),
        }
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.definition.task_type = task_type;
        self
    }

    pub fn with_plugin_name(mut self, plugin_name: &str) -> Self {
        self.definition.plugin_name = plugin_name.to_string();
        self
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.definition.configuration = configuration;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.definition
    }
}

pub struct MonitorResultBuilder {
    result: MonitorResult,
}

impl MonitorResultBuilder {
    pub fn new(location: &str, system_id: &str) -> Self {
        Self {
            result: MonitorResult {
                location: location.to_string(),
                system_id: system_id.to_string(),
                monitor_type: "ICMP".to_string(),
                node_id: None,
                status: "Up".to_string(),
                response_time_ms: 1.5,
                metrics: BTreeMap::new(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn with_monitor_type(mut self, monitor_type: &str) -> Self {
        self.result.monitor_type = monitor_type.to_string();
        self
    }

    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.result.response_time_ms = response_time_ms;
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.result.metrics.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> MonitorResult {
        self.result
    }
}

pub fn detector_result(location: &str, system_id: &str, detected: bool) -> DetectorResult {
    DetectorResult {
        location: location.to_string(),
        system_id: system_id.to_string(),
        detector_type: "SNMP".to_string(),
        node_id: Some("node-1".to_string()),
        detected,
        metrics: BTreeMap::new(),
        timestamp: Utc::now(),
    }
}
