//! HTTP server for the Prometheus metrics endpoint
//!
//! Serves `/metrics` for scraping and `/health`, which reports whether the
//! emitter can still reach its filesystem.
//!
//! # Example
//!
//! ```ignore
//! use hdfs_sink::metrics_server::MetricsServer;
//!
//! let handle = MetricsServer::start(config.metrics_addr, emitter.clone());
//!
//! // Later, to shutdown
//! handle.abort();
//! ```

use crate::emit::Emitter;
use axum::{
    Router, extract::State, http::StatusCode, response::IntoResponse, routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on `addr`
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    /// The server runs until aborted or the process exits.
    pub fn start(addr: SocketAddr, emitter: Arc<dyn Emitter>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let app = router(emitter);

            info!(addr = %addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, addr = %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

fn router(emitter: Arc<dyn Emitter>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(emitter)
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Handler for /health endpoint
async fn health_handler(State(emitter): State<Arc<dyn Emitter>>) -> impl IntoResponse {
    if emitter.health().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
    }
}
