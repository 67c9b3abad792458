//! HDFS sink - reads newline-delimited JSON events from stdin
//!
//! ## Usage
//!
//! ```bash
//! HDFS_SINK_PATH='/logs/%{source}/%{+%Y-%m-%d}.log' \
//! HDFS_SINK_ENABLE_APPEND=true \
//!     tail -F app.ndjson | hdfs-sink
//! ```
//!
//! ## Environment Variables
//!
//! - `HDFS_SINK_PATH`: path template (required)
//! - `HDFS_SINK_MESSAGE_FORMAT`: payload template (default: full event JSON)
//! - `HDFS_SINK_FLUSH_INTERVAL`: seconds between flushes, 0 = every write (default: 60)
//! - `HDFS_SINK_ENABLE_APPEND` / `HDFS_SINK_ENABLE_REOPEN`: existing-file policy (default: false)
//! - `HDFS_SINK_REMOTE_URI`: filesystem root (default: "file:///tmp/hdfs-sink")
//! - `HDFS_SINK_HADOOP_CONFIG_RESOURCES`: comma-separated client config files
//! - `HDFS_SINK_METRICS_ADDR`: metrics server address (default: "0.0.0.0:9090")
//! - `HDFS_SINK_LOG_LEVEL`: log level (default: "info")
//! - `HDFS_SINK_LOG_FORMAT`: "json" or "pretty" (default: "pretty")

use hdfs_sink::config::{LogFormat, SinkConfig};
use hdfs_sink::emit::{Emitter, HdfsEmitter};
use hdfs_sink::message::Message;
use hdfs_sink::metrics::Metrics;
use hdfs_sink::metrics_server::MetricsServer;
use hdfs_sink::remote::LocalConnector;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SinkConfig::from_env()?;
    init_tracing(&config);

    info!(
        path = %config.path,
        remote_uri = %config.remote_uri,
        flush_interval_secs = config.flush_interval_secs,
        metrics_addr = %config.metrics_addr,
        "Starting HDFS sink"
    );

    Metrics::init()?;

    let emitter = Arc::new(HdfsEmitter::connect(&config, &LocalConnector).await?);
    let metrics_handle = MetricsServer::start(config.metrics_addr, emitter.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut line_no = 0u64;
    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of input");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        let msg = match Message::from_json_line(&line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed event");
                continue;
            }
        };

        if let Err(e) = emitter.write(&msg).await {
            warn!(line = line_no, event_id = %msg.id, error = %e, "Failed to write event");
        }
    }

    emitter.shutdown().await?;
    metrics_handle.abort();

    info!(
        written = emitter.written_count(),
        failed = emitter.failed_count(),
        "HDFS sink shutdown complete"
    );
    Ok(())
}

fn init_tracing(config: &SinkConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout may be piped elsewhere; logs go to stderr
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
