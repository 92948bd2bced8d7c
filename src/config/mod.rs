//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::bus::TransportConfig;
use crate::report::ReportConfig;
use crate::source::SourceConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "tandem.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TANDEM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TANDEM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TANDEM_LOG";

/// Default channel for the first processor.
pub const DEFAULT_PROCESSOR_A_CHANNEL: &str = "worker1";
/// Default channel for the second processor.
pub const DEFAULT_PROCESSOR_B_CHANNEL: &str = "worker2";
/// Default channel the processors report results on.
pub const DEFAULT_AGGREGATION_CHANNEL: &str = "validation";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Names of the three channels the pipeline runs over.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub processor_a: String,
    pub processor_b: String,
    pub aggregation: String,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            processor_a: DEFAULT_PROCESSOR_A_CHANNEL.to_string(),
            processor_b: DEFAULT_PROCESSOR_B_CHANNEL.to_string(),
            aggregation: DEFAULT_AGGREGATION_CHANNEL.to_string(),
        }
    }
}

impl ChannelsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let names = [&self.processor_a, &self.processor_b, &self.aggregation];
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(ConfigError::Invalid("channel names must not be empty".to_string()));
        }
        if self.processor_a == self.processor_b
            || self.processor_a == self.aggregation
            || self.processor_b == self.aggregation
        {
            return Err(ConfigError::Invalid(format!(
                "channel names must be distinct, got {}, {} and {}",
                self.processor_a, self.processor_b, self.aggregation
            )));
        }
        Ok(())
    }
}

/// Default aggregator idle timeout.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Aggregator termination settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Results expected per dispatched record; the termination budget is
    /// `records * budget_multiplier`.
    pub budget_multiplier: usize,
    /// Give up waiting after this long without a result. A result that
    /// never arrives (failed scoring, lost message) otherwise keeps the run
    /// open forever; set to null to wait indefinitely.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            budget_multiplier: 2,
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl AggregationConfig {
    /// Termination budget for a run over `records` records.
    pub fn budget_for(&self, records: usize) -> usize {
        records.saturating_mul(self.budget_multiplier)
    }

    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        self.idle_timeout_secs.map(std::time::Duration::from_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub channels: ChannelsConfig,
    pub aggregation: AggregationConfig,
    pub source: SourceConfig,
    pub report: ReportConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// - `tandem.yaml` in the working directory (optional)
    /// - `path`, usually from `--config` (required when given)
    /// - file named by `TANDEM_CONFIG` (required when set)
    /// - `TANDEM__SECTION__KEY` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channels.validate()?;
        if self.aggregation.budget_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "aggregation.budget_multiplier must be at least 1".to_string(),
            ));
        }
        if self.aggregation.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "aggregation.idle_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
