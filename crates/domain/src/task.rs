use serde::{Deserialize, Serialize};

use gateway_errors::{DecodeError, GatewayError, GatewayResult};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "MONITOR")]
    Monitor,
    #[serde(rename = "DETECTOR")]
    Detector,
    #[serde(rename = "COLLECTOR")]
    Collector,
    #[serde(rename = "CONNECTOR")]
    Connector,
    #[serde(rename = "LISTENER")]
    Listener,
    #[serde(rename = "SCANNER")]
    Scanner,
}

/// 单个监控任务定义
///
/// 对网关而言是不可分割的值，配置内容原样下发给Minion。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub task_type: TaskType,
    pub plugin_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl TaskDefinition {
    pub fn new<I: Into<String>, P: Into<String>>(id: I, task_type: TaskType, plugin_name: P) -> Self {
        Self {
            id: id.into(),
            task_type,
            plugin_name: plugin_name.into(),
            schedule: None,
            configuration: serde_json::Value::Null,
        }
    }

    pub fn with_schedule<S: Into<String>>(mut self, schedule: S) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }
}

/// 一个租户位置下的有序任务集合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSet {
    #[serde(default)]
    pub task_definitions: Vec<TaskDefinition>,
}

impl TaskSet {
    pub fn new(task_definitions: Vec<TaskDefinition>) -> Self {
        Self { task_definitions }
    }

    pub fn len(&self) -> usize {
        self.task_definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_definitions.is_empty()
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.task_definitions.iter().map(|t| t.id.as_str()).collect()
    }

    /// 追加任务定义，不做去重
    pub fn append(&mut self, definitions: &[TaskDefinition]) {
        self.task_definitions.extend_from_slice(definitions);
    }

    /// 应用一批更新：先处理所有删除，再处理添加；已存在的ID原位替换
    pub fn apply_updates(&mut self, updates: &[TaskUpdate]) -> UpdateSummary {
        let mut summary = UpdateSummary::default();

        for update in updates {
            if let TaskUpdate::Remove { task_id } = update {
                let before = self.task_definitions.len();
                self.task_definitions.retain(|t| &t.id != task_id);
                summary.num_removed += before - self.task_definitions.len();
            }
        }

        for update in updates {
            if let TaskUpdate::Add { definition } = update {
                match self
                    .task_definitions
                    .iter_mut()
                    .find(|t| t.id == definition.id)
                {
                    Some(existing) => {
                        *existing = definition.clone();
                        summary.num_replaced += 1;
                    }
                    None => {
                        self.task_definitions.push(definition.clone());
                        summary.num_new += 1;
                    }
                }
            }
        }

        summary
    }

    pub fn to_bytes(&self) -> GatewayResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| GatewayError::Serialization(format!("序列化任务集失败: {e}")))
    }

    /// 空载荷视为空任务集
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::invalid_payload(format!("任务集解析失败: {e}")))
    }
}

impl From<Vec<TaskDefinition>> for TaskSet {
    fn from(task_definitions: Vec<TaskDefinition>) -> Self {
        Self::new(task_definitions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskUpdate {
    Add { definition: TaskDefinition },
    Remove { task_id: String },
}

/// 原子更新的统计结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub num_new: usize,
    pub num_replaced: usize,
    pub num_removed: usize,
}

impl UpdateSummary {
    /// 没有任何任务被增删改
    pub fn is_empty(&self) -> bool {
        self.num_new == 0 && self.num_replaced == 0 && self.num_removed == 0
    }
}
