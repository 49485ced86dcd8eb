//! Load: config loading from file and environment variables.

use std::path::Path;
use std::str::FromStr;

use super::model::DetectorConfig;
use crate::error::{DetectError, DetectResult};

pub const CONFIG_FILE_ENV: &str = "DETECTOR_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "detector.toml";

fn override_with<T, F>(lookup: &F, key: &str, slot: &mut T) -> DetectResult<()>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| DetectError::Config(format!("{}: invalid value {:?}", key, raw)))?;
    }
    Ok(())
}

impl DetectorConfig {
    /// Load configuration from file, then apply environment overrides.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> DetectResult<Self> {
        let config_path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading detector configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", config_path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> DetectResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| DetectError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Override individual values from `DETECTOR_*` variables resolved by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> DetectResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "DETECTOR_EARLY_EXIT_THRESHOLD", &mut self.early_exit_threshold)?;
        override_with(&lookup, "DETECTOR_MAX_DETECTION_TIME_MS", &mut self.max_detection_time_ms)?;
        override_with(&lookup, "DETECTOR_MAX_STREAM_BYTES", &mut self.max_stream_bytes)?;

        let cache = &mut self.cache;
        override_with(&lookup, "DETECTOR_CACHE_ENABLED", &mut cache.enabled)?;
        override_with(&lookup, "DETECTOR_CACHE_MAX_ENTRIES", &mut cache.max_entries)?;
        override_with(&lookup, "DETECTOR_CACHE_TTL_SECS", &mut cache.ttl_secs)?;
        override_with(&lookup, "DETECTOR_CACHE_MAX_PAYLOAD_SIZE", &mut cache.max_payload_size)?;
        override_with(&lookup, "DETECTOR_CACHE_MAX_MEMORY_BYTES", &mut cache.max_memory_bytes)?;
        override_with(&lookup, "DETECTOR_CACHE_MIN_CONFIDENCE", &mut cache.min_confidence_to_cache)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = DetectorConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("DETECTOR_EARLY_EXIT_THRESHOLD", "0.99"),
                ("DETECTOR_CACHE_ENABLED", "false"),
                ("DETECTOR_CACHE_TTL_SECS", " 60 "),
            ]))
            .unwrap();
        assert_eq!(config.early_exit_threshold, 0.99);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_entries, 1024);
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let mut config = DetectorConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("DETECTOR_CACHE_MAX_ENTRIES", "many")]))
            .unwrap_err();
        assert!(matches!(err, DetectError::Config(ref msg) if msg.contains("DETECTOR_CACHE_MAX_ENTRIES")));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("detector-conf-{}.toml", std::process::id()));
        std::fs::write(&path, "max_detection_time_ms = 500\n[cache]\nenabled = false\n").unwrap();

        let config = DetectorConfig::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.max_detection_time_ms, 500);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let path = std::env::temp_dir().join(format!("detector-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "max_detection_time_ms = \"soon\"\n").unwrap();

        let err = DetectorConfig::from_file(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err, DetectError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DetectorConfig::from_file("/nonexistent/detector.toml").unwrap_err();
        assert!(matches!(err, DetectError::Io(_)));
    }
}
