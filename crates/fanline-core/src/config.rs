//! Configuration types for fanline
//!
//! Configuration is read from a YAML file with `${VAR}` / `${VAR:-default}`
//! environment expansion. Every field has a default, so an empty file (or
//! no file at all) yields a runnable local setup.
//!
//! ```yaml
//! broker:
//!   bootstrap_servers: ["${KAFKA_BROKERS:-localhost:9092}"]
//!   topic: users
//! pipeline:
//!   workers: 3
//!   batch_size: 10000
//!   formats: [json]
//! input:
//!   path: users.csv
//!   delimiter: "|"
//! export:
//!   json_path: users.json
//!   avro_path: users.avro
//! logging:
//!   level: info
//!   file: fanline.log
//! ```

use crate::error::{Error, Result};
use crate::format::SerializationFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use validator::Validate;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct FanlineConfig {
    /// Broker connection and target topic
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// Worker pool and batch producer sizing
    #[serde(default)]
    #[validate(nested)]
    pub pipeline: PipelineConfig,

    /// CSV input
    #[serde(default)]
    pub input: InputConfig,

    /// Optional whole-dataset file exports
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging service
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BrokerConfig {
    /// Bootstrap servers (host:port)
    #[serde(default = "default_bootstrap_servers")]
    #[validate(length(min = 1))]
    pub bootstrap_servers: Vec<String>,

    /// Topic every record is published to
    #[serde(default = "default_topic")]
    #[validate(length(min = 1, max = 249))]
    pub topic: String,

    /// Partition used when the broker does not pick one
    #[serde(default)]
    #[validate(range(min = 0))]
    pub partition: i32,

    /// Local produce queue limit; submissions beyond it are rejected
    #[serde(default = "default_max_queued_messages")]
    #[validate(range(min = 1))]
    pub max_queued_messages: usize,

    /// Publish to an in-process broker instead of the real cluster
    #[serde(default)]
    pub dry_run: bool,
}

fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_topic() -> String {
    "users".to_string()
}

fn default_max_queued_messages() -> usize {
    100_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            topic: default_topic(),
            partition: 0,
            max_queued_messages: default_max_queued_messages(),
            dry_run: false,
        }
    }
}

/// Worker pool and producer sizing
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PipelineConfig {
    /// Number of fan-out workers
    #[serde(default = "default_workers")]
    #[validate(range(min = 1))]
    pub workers: usize,

    /// Records per batch
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Concurrent per-record submissions inside one batch
    #[serde(default = "default_submit_concurrency")]
    #[validate(range(min = 1))]
    pub submit_concurrency: usize,

    /// Delivery report channel capacity; must hold a whole batch
    #[serde(default = "default_delivery_buffer")]
    #[validate(range(min = 1))]
    pub delivery_buffer: usize,

    /// Serialization formats to publish with (one publish task each)
    #[serde(default = "default_formats")]
    #[validate(length(min = 1))]
    pub formats: Vec<SerializationFormat>,
}

fn default_workers() -> usize {
    3
}

fn default_batch_size() -> usize {
    10_000
}

fn default_submit_concurrency() -> usize {
    10
}

fn default_delivery_buffer() -> usize {
    10_000
}

fn default_formats() -> Vec<SerializationFormat> {
    vec![SerializationFormat::Json]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            submit_concurrency: default_submit_concurrency(),
            delivery_buffer: default_delivery_buffer(),
            formats: default_formats(),
        }
    }
}

/// CSV input configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Path of the delimiter-separated input file
    #[serde(default = "default_input_path")]
    pub path: PathBuf,

    /// Field delimiter (single ASCII character)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Whether the first row is a header
    #[serde(default = "default_true")]
    pub has_header: bool,
}

fn default_input_path() -> PathBuf {
    PathBuf::from("users.csv")
}

fn default_delimiter() -> char {
    '|'
}

fn default_true() -> bool {
    true
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            delimiter: default_delimiter(),
            has_header: true,
        }
    }
}

/// Whole-dataset file exports, each run as its own pool task
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Write all records as a pretty JSON array
    #[serde(default)]
    pub json_path: Option<PathBuf>,

    /// Write all records as an Avro object container file
    #[serde(default)]
    pub avro_path: Option<PathBuf>,
}

/// Logging service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file (written by a background writer)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl FanlineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);

        // An empty document deserializes to unit, not to an empty map
        let config: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| Error::config(format!("failed to parse config: {}", e)))?
        };

        config.ensure_valid()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate field ranges and cross-field constraints
    pub fn ensure_valid(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;

        if self.pipeline.delivery_buffer < self.pipeline.batch_size {
            return Err(Error::config(format!(
                "pipeline.delivery_buffer ({}) must be >= pipeline.batch_size ({}); \
                 a smaller buffer can stall the broker client mid-batch",
                self.pipeline.delivery_buffer, self.pipeline.batch_size
            )));
        }

        if !self.input.delimiter.is_ascii() {
            return Err(Error::config(format!(
                "input.delimiter must be a single ASCII character, got '{}'",
                self.input.delimiter
            )));
        }

        Ok(())
    }
}
