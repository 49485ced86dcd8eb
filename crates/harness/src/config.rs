use anyhow::{Context, Result};
use detector::adapter::formats::binary_record;
use detector::DetectorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
    pub run: RunConfig,
    pub tiers: TierConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Detections per tier and payload kind
    pub iterations: usize,
    pub seed: u64,
    /// Reuse one payload per tier/kind so later iterations hit the cache
    pub reuse_payloads: bool,
}

/// Records per generated payload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierConfig {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Write the JSON report here in addition to stdout
    pub report_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Text,
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stderr,
    File { path: String },
}

impl HarnessConfig {
    /// Load configuration from harness.toml and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Compile-time defaults first, so keys missing from files/env still resolve
        let defaults = config::Config::try_from(&HarnessConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        // 1. config/harness.toml (run from the crate)
        // 2. crates/harness/config/harness.toml (run from the workspace root)
        for path in ["config/harness", "crates/harness/config/harness"] {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Double underscore for nested keys: HARNESS__RUN__ITERATIONS
        builder = builder.add_source(
            config::Environment::with_prefix("HARNESS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.iterations == 0 {
            anyhow::bail!("run.iterations must be > 0");
        }
        for (tier, records) in [
            ("small", self.tiers.small),
            ("medium", self.tiers.medium),
            ("large", self.tiers.large),
        ] {
            if records == 0 {
                anyhow::bail!("tiers.{} must be > 0", tier);
            }
            if records > binary_record::MAX_RECORDS {
                anyhow::bail!(
                    "tiers.{} must be <= {} (binary frame record limit)",
                    tier,
                    binary_record::MAX_RECORDS
                );
            }
        }
        if let LogOutput::File { path } = &self.logging.output {
            if path.is_empty() {
                anyhow::bail!("logging.output.file.path must not be empty");
            }
        }
        self.detector
            .validate()
            .context("Invalid detector configuration")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            run: RunConfig {
                iterations: 20,
                seed: 42,
                reuse_payloads: true,
            },
            tiers: TierConfig {
                small: 1,
                medium: 300,
                large: 20_000,
            },
            output: OutputConfig {
                format: OutputFormat::Text,
                report_path: None,
            },
            logging: LoggingConfig {
                level: "info,harness=debug,detector=info".to_string(),
                format: LogFormat::Pretty,
                output: LogOutput::Stderr,
            },
            detector: DetectorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(HarnessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let mut config = HarnessConfig::default();
        config.run.iterations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("run.iterations"));
    }

    #[test]
    fn test_oversized_tier_rejected() {
        let mut config = HarnessConfig::default();
        config.tiers.large = binary_record::MAX_RECORDS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tiers.large"));
    }

    #[test]
    fn test_invalid_detector_config_rejected() {
        let mut config = HarnessConfig::default();
        config.detector.early_exit_threshold = 2.0;
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("early_exit_threshold"));
    }

    #[test]
    fn test_defaults_survive_config_layering() {
        let defaults = config::Config::try_from(&HarnessConfig::default()).unwrap();
        let loaded: HarnessConfig = config::Config::builder()
            .add_source(defaults)
            .set_override("run.iterations", 3)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(loaded.run.iterations, 3);
        assert_eq!(loaded.tiers.large, 20_000);
        assert_eq!(loaded.output.format, OutputFormat::Text);
        assert_eq!(loaded.detector, DetectorConfig::default());
    }
}
