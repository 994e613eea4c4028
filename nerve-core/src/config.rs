//! Configuration validation errors shared by the engine and the resilience toolkit.

use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Fail with `ConfigError::Invalid` unless `condition` holds
pub fn ensure(condition: bool, field: &'static str, reason: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: reason.into(),
        })
    }
}
