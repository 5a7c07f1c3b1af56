use std::fmt;

use gateway_errors::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

/// 孪生订阅键中租户和位置之间的分隔符
pub const TWIN_KEY_SEPARATOR: char = '/';

fn validate_part(field: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() {
        return Err(GatewayError::validation_error(format!("{field} 不能为空")));
    }
    if value.contains(TWIN_KEY_SEPARATOR) {
        return Err(GatewayError::validation_error(format!(
            "{field} 不能包含 '{TWIN_KEY_SEPARATOR}': {value}"
        )));
    }
    Ok(())
}

/// 租户 + 位置组合键
///
/// 任务集存储和Minion分组的主键。两个字段都按大小写敏感的方式精确比较。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantLocationKey {
    pub tenant_id: String,
    pub location: String,
}

impl TenantLocationKey {
    pub fn new<T: Into<String>, L: Into<String>>(tenant_id: T, location: L) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            location: location.into(),
        }
    }

    /// 两个字段都非空且不含分隔符，孪生键才能一一对应回租户位置
    pub fn validate(&self) -> GatewayResult<()> {
        validate_part("tenant_id", &self.tenant_id)?;
        validate_part("location", &self.location)
    }

    /// 该位置任务集对应的孪生订阅键，格式为 `tenant/location`
    pub fn twin_key(&self) -> String {
        format!("{}{TWIN_KEY_SEPARATOR}{}", self.tenant_id, self.location)
    }

    /// 从孪生订阅键解析，恰好一个分隔符且两侧非空
    pub fn from_twin_key(key: &str) -> Option<Self> {
        let (tenant_id, location) = key.split_once(TWIN_KEY_SEPARATOR)?;
        let parsed = Self::new(tenant_id, location);
        parsed.validate().ok()?;
        Some(parsed)
    }
}

impl fmt::Display for TenantLocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.location)
    }
}

/// 一个Minion进程的身份
///
/// 同一身份可以在新的传输会话下重连。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinionIdentity {
    pub tenant_id: String,
    pub system_id: String,
    pub location: String,
}

impl MinionIdentity {
    pub fn new<T, S, L>(tenant_id: T, system_id: S, location: L) -> Self
    where
        T: Into<String>,
        S: Into<String>,
        L: Into<String>,
    {
        Self {
            tenant_id: tenant_id.into(),
            system_id: system_id.into(),
            location: location.into(),
        }
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.system_id.is_empty() {
            return Err(GatewayError::validation_error("system_id 不能为空"));
        }
        self.tenant_location().validate()
    }

    pub fn tenant_location(&self) -> TenantLocationKey {
        TenantLocationKey::new(self.tenant_id.clone(), self.location.clone())
    }
}

impl fmt::Display for MinionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.system_id, self.tenant_id, self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_is_case_sensitive() {
        let a = TenantLocationKey::new("t1", "loc1");
        let b = TenantLocationKey::new("t1", "LOC1");
        let c = TenantLocationKey::new("t1", "loc1");

        assert_ne!(a, b);
        assert_eq!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_twin_key_format() {
        let key = TenantLocationKey::new("t1", "loc1");
        assert_eq!(key.twin_key(), "t1/loc1");
        assert_eq!(key.to_string(), "t1/loc1");
        assert_eq!(TenantLocationKey::from_twin_key("t1/loc1"), Some(key));
        assert_eq!(TenantLocationKey::from_twin_key("t1/loc/sub"), None);
        assert_eq!(TenantLocationKey::from_twin_key("no-separator"), None);
        assert_eq!(TenantLocationKey::from_twin_key("/loc1"), None);
    }

    #[test]
    fn test_separator_in_either_part_is_rejected() {
        // 否则 ("a/b","c") 和 ("a","b/c") 会得到同一个孪生键
        let left = TenantLocationKey::new("a/b", "c");
        let right = TenantLocationKey::new("a", "b/c");
        assert_eq!(left.twin_key(), right.twin_key());

        assert!(matches!(left.validate(), Err(GatewayError::ValidationError(_))));
        assert!(matches!(right.validate(), Err(GatewayError::ValidationError(_))));
        assert!(TenantLocationKey::new("", "c").validate().is_err());
        assert!(TenantLocationKey::new("a", "c").validate().is_ok());
        assert_eq!(TenantLocationKey::from_twin_key("a/b/c"), None);
    }

    #[test]
    fn test_identity_validate() {
        assert!(MinionIdentity::new("t1", "m1", "loc1").validate().is_ok());
        assert!(MinionIdentity::new("t1", "", "loc1").validate().is_err());
        assert!(MinionIdentity::new("t1", "m1", "b/c").validate().is_err());
        assert!(MinionIdentity::new("a/b", "m1", "c").validate().is_err());
    }

    #[test]
    fn test_identity_tenant_location() {
        let identity = MinionIdentity::new("t1", "m1", "loc1");
        assert_eq!(identity.tenant_location(), TenantLocationKey::new("t1", "loc1"));
        assert_eq!(identity.to_string(), "m1@t1/loc1");
    }
}
