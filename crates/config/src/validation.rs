use std::net::SocketAddr;

use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that an address parses as `host:port` with a non-zero port
    pub fn validate_socket_addr(value: &str, field_name: &str) -> ConfigResult<()> {
        let addr: SocketAddr = value.parse().map_err(|_| {
            crate::ConfigError::Validation(format!(
                "{field_name} must be an ip:port address, got '{value}'"
            ))
        })?;
        if addr.port() == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} port cannot be 0"
            )));
        }
        Ok(())
    }

    /// Validate that a millisecond interval is within (0, 1h]
    pub fn validate_millis(millis: u64, field_name: &str) -> ConfigResult<()> {
        if millis == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if millis > 3_600_000 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600000"
            )));
        }
        Ok(())
    }

    /// Validate that a count is reasonable
    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 10000 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 10000"
            )));
        }
        Ok(())
    }

    /// Validate that a value is one of the allowed options
    pub fn validate_one_of(value: &str, allowed: &[&str], field_name: &str) -> ConfigResult<()> {
        if !allowed.contains(&value) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be one of {allowed:?}, got '{value}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("test", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("  test  ", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "field").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_socket_addr() {
        assert!(ValidationUtils::validate_socket_addr("0.0.0.0:8990", "addr").is_ok());
        assert!(ValidationUtils::validate_socket_addr("[::1]:9090", "addr").is_ok());
        assert!(ValidationUtils::validate_socket_addr("127.0.0.1:0", "addr").is_err());
        assert!(ValidationUtils::validate_socket_addr("localhost", "addr").is_err());
        assert!(ValidationUtils::validate_socket_addr("", "addr").is_err());
    }

    #[test]
    fn test_validate_millis() {
        assert!(ValidationUtils::validate_millis(1, "ttl").is_ok());
        assert!(ValidationUtils::validate_millis(3_600_000, "ttl").is_ok());
        assert!(ValidationUtils::validate_millis(0, "ttl").is_err());
        assert!(ValidationUtils::validate_millis(3_600_001, "ttl").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(10, "test").is_ok());
        assert!(ValidationUtils::validate_count(10000, "test").is_ok());
        assert!(ValidationUtils::validate_count(0, "test").is_err());
        assert!(ValidationUtils::validate_count(10001, "test").is_err());
    }

    #[test]
    fn test_validate_one_of() {
        assert!(ValidationUtils::validate_one_of("sqlite", &["memory", "sqlite"], "backend").is_ok());
        assert!(ValidationUtils::validate_one_of("redis", &["memory", "sqlite"], "backend").is_err());
    }
}
