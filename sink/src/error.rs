//! Error types for the HDFS sink

use thiserror::Error;

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Main error type for the sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote file exists and neither append nor reopen is enabled
    #[error("refusing to reopen existing file '{path}' (enable_append and enable_reopen are both off)")]
    RefuseReopen { path: String },

    /// Append failed again after lease recovery
    #[error("append to '{path}' failed after lease recovery: {source}")]
    Append {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Existence check, create or overwrite failed
    #[error("failed to open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a record to an open stream failed
    #[error("write to '{path}' failed: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The path template rendered to an empty string
    #[error("path template rendered an empty path")]
    EmptyPath,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl SinkError {
    /// Short, stable label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            SinkError::Config(_) => "config",
            SinkError::RefuseReopen { .. } => "refuse_reopen",
            SinkError::Append { .. } => "append",
            SinkError::Open { .. } => "open",
            SinkError::Write { .. } => "write",
            SinkError::EmptyPath => "empty_path",
            SinkError::Io(_) => "io",
            SinkError::Serialization(_) => "serialization",
            SinkError::Metrics(_) => "metrics",
        }
    }
}

/// Error type for plugin operations
#[derive(Error, Debug)]
pub enum PluginError {
    /// Initialization failed
    #[error("initialization failed: {0}")]
    Init(String),

    /// Send failed
    #[error("send failed: {0}")]
    Send(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Shutdown error
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl From<SinkError> for PluginError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Config(msg) => PluginError::Init(msg),
            SinkError::Open { .. } | SinkError::Append { .. } => {
                PluginError::Connection(err.to_string())
            }
            other => PluginError::Send(other.to_string()),
        }
    }
}
