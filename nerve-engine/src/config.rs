//! Aggregator configuration

use nerve_core::config::{ensure, ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Aggregation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Width of a time window bucket in seconds
    pub window_bucket_secs: u32,

    /// Events stored per `(type, window)` bucket; later arrivals are counted but not stored
    pub max_events_per_bucket: usize,

    /// Period of the retention sweep
    pub cleanup_interval_ms: u64,

    /// Buckets, cache entries and hierarchies older than this are swept
    pub retention_secs: u64,

    /// Events per second above which backpressure engages
    pub backpressure_threshold: usize,

    /// Probability of dropping an event while backpressure is engaged
    pub backpressure_drop_probability: f64,

    /// Max distance between two timestamps for them to count as correlated
    pub correlation_window_secs: u64,

    /// Capacity of the actor's request inbox
    pub inbox_capacity: usize,

    /// Capacity of the accepted-event broadcast channel
    pub subscriber_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_bucket_secs: 60,
            max_events_per_bucket: 1000,
            cleanup_interval_ms: 60_000,
            retention_secs: 3600,
            backpressure_threshold: 10_000,
            backpressure_drop_probability: 0.5,
            correlation_window_secs: 5,
            inbox_capacity: 10_000,
            subscriber_capacity: 1024,
        }
    }
}

impl AggregatorConfig {
    /// Parse a JSON document; missing keys keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            field: "path",
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.window_bucket_secs > 0, "window_bucket_secs", "must be positive")?;
        ensure(
            self.max_events_per_bucket > 0,
            "max_events_per_bucket",
            "must be positive",
        )?;
        ensure(self.cleanup_interval_ms > 0, "cleanup_interval_ms", "must be positive")?;
        ensure(self.retention_secs > 0, "retention_secs", "must be positive")?;
        ensure(
            (0.0..=1.0).contains(&self.backpressure_drop_probability),
            "backpressure_drop_probability",
            format!("must be within [0, 1], got {}", self.backpressure_drop_probability),
        )?;
        ensure(self.inbox_capacity > 0, "inbox_capacity", "must be positive")?;
        ensure(self.subscriber_capacity > 0, "subscriber_capacity", "must be positive")?;
        Ok(())
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_bucket_secs, 60);
        assert_eq!(config.max_events_per_bucket, 1000);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
        assert_eq!(config.retention_secs, 3600);
        assert_eq!(config.backpressure_threshold, 10_000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"backpressure_threshold": 50, "retention_secs": 120}"#;
        let config = AggregatorConfig::from_json_str(json).unwrap();
        assert_eq!(config.backpressure_threshold, 50);
        assert_eq!(config.retention_secs, 120);
        assert_eq!(config.max_events_per_bucket, 1000);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            AggregatorConfig::from_json_str(r#"{"window_bucket_secs": 0}"#),
            Err(ConfigError::Invalid {
                field: "window_bucket_secs",
                ..
            })
        ));
        let json = r#"{"backpressure_drop_probability": 1.5}"#;
        assert!(AggregatorConfig::from_json_str(json).is_err());
        assert!(matches!(
            AggregatorConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"correlation_window_secs": 10}}"#).unwrap();

        let config = AggregatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.correlation_window_secs, 10);

        assert!(AggregatorConfig::from_file("/nonexistent/nerve.json").is_err());
    }
}
