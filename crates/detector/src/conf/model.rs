//! Model: DetectorConfig and CacheConfig.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::adapter::DEFAULT_EARLY_EXIT_THRESHOLD;
use crate::error::{DetectError, DetectResult};

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// A score at or above this ends detection early
    pub early_exit_threshold: f64,
    pub max_detection_time_ms: u64,
    /// Upper bound for `detect_reader` input
    pub max_stream_bytes: usize,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
    /// Payloads larger than this are fingerprinted from sampled windows
    pub max_payload_size: usize,
    pub max_memory_bytes: usize,
    pub min_confidence_to_cache: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            early_exit_threshold: DEFAULT_EARLY_EXIT_THRESHOLD,
            max_detection_time_ms: 250,
            max_stream_bytes: 64 * MIB,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            ttl_secs: 300,
            max_payload_size: MIB,
            max_memory_bytes: 64 * MIB,
            min_confidence_to_cache: 0.3,
        }
    }
}

fn check_unit_interval(name: &str, value: f64) -> DetectResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(DetectError::Config(format!("{} must be within [0, 1], got {}", name, value)));
    }
    Ok(())
}

impl DetectorConfig {
    pub fn max_detection_time(&self) -> Duration {
        Duration::from_millis(self.max_detection_time_ms)
    }

    /// Validate that configuration values are sane
    pub fn validate(&self) -> DetectResult<()> {
        check_unit_interval("early_exit_threshold", self.early_exit_threshold)?;
        if self.max_detection_time_ms == 0 {
            return Err(DetectError::Config("max_detection_time_ms must be > 0".to_string()));
        }
        if self.max_stream_bytes == 0 {
            return Err(DetectError::Config("max_stream_bytes must be > 0".to_string()));
        }
        self.cache.validate()
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> DetectResult<()> {
        check_unit_interval("cache.min_confidence_to_cache", self.min_confidence_to_cache)?;
        if !self.enabled {
            return Ok(());
        }
        if self.max_entries == 0 {
            return Err(DetectError::Config("cache.max_entries must be > 0 when the cache is enabled".to_string()));
        }
        if self.ttl_secs == 0 {
            return Err(DetectError::Config("cache.ttl_secs must be > 0 when the cache is enabled".to_string()));
        }
        if self.max_payload_size == 0 {
            return Err(DetectError::Config("cache.max_payload_size must be > 0".to_string()));
        }
        if self.max_memory_bytes == 0 {
            return Err(DetectError::Config("cache.max_memory_bytes must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_detection_time(), Duration::from_millis(250));
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.max_payload_size, 1_048_576);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let config = DetectorConfig {
            early_exit_threshold: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("early_exit_threshold"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = DetectorConfig {
            max_detection_time_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));
    }

    #[test]
    fn test_disabled_cache_skips_size_checks() {
        let mut config = DetectorConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DetectorConfig = toml::from_str(
            r#"
            early_exit_threshold = 0.9

            [cache]
            max_entries = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.early_exit_threshold, 0.9);
        assert_eq!(config.cache.max_entries, 16);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.max_detection_time_ms, 250);
    }
}
