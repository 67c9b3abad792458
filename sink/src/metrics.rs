//! Prometheus metrics for the HDFS sink

use crate::error::{Result, SinkError};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All sink metrics
pub struct Metrics {
    /// Records written
    pub events_written: Counter,

    /// Events that failed to be written (by reason)
    pub write_failures: CounterVec,

    /// Output files opened (by mode: create, append, overwrite)
    pub handles_opened: CounterVec,

    /// Handles closed by the stale-eviction cycle
    pub handles_evicted: Counter,

    /// Currently open handles
    pub open_handles: Gauge,

    /// Flush cycles run
    pub flush_cycles: Counter,

    /// Lease recoveries (by outcome: recovered, timeout)
    pub lease_recoveries: CounterVec,

    /// Time spent writing one event, including any open
    pub write_latency: Histogram,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            events_written: register_counter!(
                "hdfs_sink_events_written_total",
                "Total records written"
            )
            .map_err(|e| SinkError::Metrics(format!("events_written: {e}")))?,

            write_failures: register_counter_vec!(
                "hdfs_sink_write_failures_total",
                "Total events that could not be written",
                &["reason"]
            )
            .map_err(|e| SinkError::Metrics(format!("write_failures: {e}")))?,

            handles_opened: register_counter_vec!(
                "hdfs_sink_handles_opened_total",
                "Total output files opened",
                &["mode"]
            )
            .map_err(|e| SinkError::Metrics(format!("handles_opened: {e}")))?,

            handles_evicted: register_counter!(
                "hdfs_sink_handles_evicted_total",
                "Total idle handles closed by the eviction cycle"
            )
            .map_err(|e| SinkError::Metrics(format!("handles_evicted: {e}")))?,

            open_handles: register_gauge!("hdfs_sink_open_handles", "Currently open handles")
                .map_err(|e| SinkError::Metrics(format!("open_handles: {e}")))?,

            flush_cycles: register_counter!(
                "hdfs_sink_flush_cycles_total",
                "Total timed flush cycles"
            )
            .map_err(|e| SinkError::Metrics(format!("flush_cycles: {e}")))?,

            lease_recoveries: register_counter_vec!(
                "hdfs_sink_lease_recoveries_total",
                "Total lease recoveries by outcome",
                &["outcome"]
            )
            .map_err(|e| SinkError::Metrics(format!("lease_recoveries: {e}")))?,

            write_latency: register_histogram!(
                "hdfs_sink_write_latency_seconds",
                "Time to write one event",
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0]
            )
            .map_err(|e| SinkError::Metrics(format!("write_latency: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| SinkError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

// The helpers below record only once `Metrics::init` has run, so library
// users and tests that never initialize metrics pay nothing.

pub fn try_record_written(seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.events_written.inc();
        m.write_latency.observe(seconds);
    }
}

pub fn try_record_write_failure(reason: &str) {
    if let Some(m) = Metrics::get() {
        m.write_failures.with_label_values(&[reason]).inc();
    }
}

pub fn try_record_opened(mode: &str) {
    if let Some(m) = Metrics::get() {
        m.handles_opened.with_label_values(&[mode]).inc();
    }
}

pub fn try_record_evicted(count: usize) {
    if let Some(m) = Metrics::get() {
        m.handles_evicted.inc_by(count as f64);
    }
}

pub fn try_inc_open_handles() {
    if let Some(m) = Metrics::get() {
        m.open_handles.inc();
    }
}

pub fn try_dec_open_handles(count: usize) {
    if let Some(m) = Metrics::get() {
        m.open_handles.sub(count as f64);
    }
}

pub fn try_record_flush_cycle() {
    if let Some(m) = Metrics::get() {
        m.flush_cycles.inc();
    }
}

pub fn try_record_lease_recovery(recovered: bool) {
    if let Some(m) = Metrics::get() {
        let outcome = if recovered { "recovered" } else { "timeout" };
        m.lease_recoveries.with_label_values(&[outcome]).inc();
    }
}
