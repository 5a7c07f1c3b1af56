use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinionConfig {
    pub gateway_address: String,
    pub tenant_id: String,
    pub location: String,
    /// 未设置时使用主机名
    #[serde(default)]
    pub system_id: Option<String>,
    pub reconnect_delay_ms: u64,
}

impl MinionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for MinionConfig {
    fn default() -> Self {
        Self {
            gateway_address: "127.0.0.1:8990".to_string(),
            tenant_id: "opennms-prime".to_string(),
            location: "Default".to_string(),
            system_id: None,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl ConfigValidator for MinionConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.gateway_address, "minion.gateway_address")?;
        ValidationUtils::validate_not_empty(&self.tenant_id, "minion.tenant_id")?;
        ValidationUtils::validate_not_empty(&self.location, "minion.location")?;
        if let Some(system_id) = &self.system_id {
            ValidationUtils::validate_not_empty(system_id, "minion.system_id")?;
        }
        if self.tenant_id.contains('/') {
            return Err(crate::ConfigError::Validation(
                "minion.tenant_id cannot contain '/'".to_string(),
            ));
        }
        ValidationUtils::validate_millis(self.reconnect_delay_ms, "minion.reconnect_delay_ms")?;
        Ok(())
    }
}
