//! Configuration for the HDFS sink

use crate::error::{Result, SinkError};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Default flush interval in seconds
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;

/// Main configuration for the sink
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Path template, e.g. `/logs/%{source}/%{+%Y-%m-%d}.log`
    pub path: String,

    /// Payload template. `None` writes the full JSON serialization of the event.
    pub message_format: Option<String>,

    /// Flush interval in seconds. Zero flushes after every write.
    pub flush_interval_secs: u64,

    /// Append to files that already exist
    pub enable_append: bool,

    /// Overwrite files that already exist (only consulted when append is off)
    pub enable_reopen: bool,

    /// Filesystem root the connector binds to
    pub remote_uri: String,

    /// Resource locations merged into the remote client configuration, in order
    pub hadoop_config_resources: Vec<String>,

    /// Metrics server address
    pub metrics_addr: SocketAddr,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            message_format: None,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            enable_append: false,
            enable_reopen: false,
            remote_uri: "file:///tmp/hdfs-sink".to_string(),
            hadoop_config_resources: Vec::new(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl SinkConfig {
    /// Create a configuration for the given path template with defaults elsewhere
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the payload template
    pub fn message_format(mut self, format: impl Into<String>) -> Self {
        self.message_format = Some(format.into());
        self
    }

    /// Set the flush interval in seconds (0 = flush every write)
    pub fn flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    /// Allow appending to existing files
    pub fn enable_append(mut self, enabled: bool) -> Self {
        self.enable_append = enabled;
        self
    }

    /// Allow overwriting existing files
    pub fn enable_reopen(mut self, enabled: bool) -> Self {
        self.enable_reopen = enabled;
        self
    }

    /// Flush interval as a Duration (zero = flush every write)
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Check the settings that cannot be expressed in the types
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(SinkError::Config("path is required".to_string()));
        }
        if self.remote_uri.trim().is_empty() {
            return Err(SinkError::Config("remote_uri must not be empty".to_string()));
        }
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = SinkConfig::default();

        if let Ok(path) = env::var("HDFS_SINK_PATH") {
            config.path = path;
        }

        if let Ok(format) = env::var("HDFS_SINK_MESSAGE_FORMAT") {
            config.message_format = Some(format);
        }

        if let Ok(interval) = env::var("HDFS_SINK_FLUSH_INTERVAL") {
            config.flush_interval_secs = interval
                .parse()
                .map_err(|e| SinkError::Config(format!("invalid HDFS_SINK_FLUSH_INTERVAL: {e}")))?;
        }

        if let Ok(value) = env::var("HDFS_SINK_ENABLE_APPEND") {
            config.enable_append = parse_bool("HDFS_SINK_ENABLE_APPEND", &value)?;
        }

        if let Ok(value) = env::var("HDFS_SINK_ENABLE_REOPEN") {
            config.enable_reopen = parse_bool("HDFS_SINK_ENABLE_REOPEN", &value)?;
        }

        if let Ok(uri) = env::var("HDFS_SINK_REMOTE_URI") {
            config.remote_uri = uri;
        }

        if let Ok(resources) = env::var("HDFS_SINK_HADOOP_CONFIG_RESOURCES") {
            config.hadoop_config_resources = parse_list(&resources);
        }

        if let Ok(addr) = env::var("HDFS_SINK_METRICS_ADDR") {
            config.metrics_addr = addr
                .parse()
                .map_err(|e| SinkError::Config(format!("invalid HDFS_SINK_METRICS_ADDR: {e}")))?;
        }

        if let Ok(level) = env::var("HDFS_SINK_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(format) = env::var("HDFS_SINK_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(SinkError::Config(format!(
                        "invalid HDFS_SINK_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SinkError::Config(format!(
            "invalid {name}: {other} (expected true or false)"
        ))),
    }
}

/// Comma separated list, blanks dropped
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
