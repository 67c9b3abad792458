//! HDFS emitter - appends one line per event to a path chosen per event
//!
//! For every message the emitter renders the `path` template and the payload
//! (the `message_format` template, or the full JSON serialization of the
//! event), makes sure the payload ends with a newline, and writes it through
//! the [`HandlePool`]. After the write it either flushes that handle
//! (`flush_interval = 0`) or gives the pool's flush cycle a chance to run,
//! then gives the stale-eviction cycle a chance to run.
//!
//! # Example
//!
//! ```ignore
//! let config = SinkConfig::new("/logs/%{source}/%{+%Y-%m-%d}.log").enable_append(true);
//! let emitter = HdfsEmitter::connect(&config, &LocalConnector).await?;
//! emitter.emit(&messages).await?;
//! emitter.shutdown().await?;
//! ```

use crate::config::SinkConfig;
use crate::emit::Emitter;
use crate::error::{PluginError, Result, SinkError};
use crate::message::Message;
use crate::metrics;
use crate::remote::{Connector, RemoteConf, RemoteFileSystem};
use crate::stream::{HandlePool, PoolOptions};
use crate::template::Template;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Emitter writing newline-delimited records to a remote filesystem
///
/// All pool work for one event (open, write, flush, eviction) happens under a
/// single lock, so concurrent callers are serialized and writes to a path
/// keep their arrival order.
pub struct HdfsEmitter {
    path: Template,
    message_format: Option<Template>,
    fs: Arc<dyn RemoteFileSystem>,
    pool: Mutex<HandlePool>,
    written: AtomicU64,
    failed: AtomicU64,
}

impl HdfsEmitter {
    /// Create an emitter over an already connected filesystem
    ///
    /// # Errors
    /// Returns `SinkError::Config` if the configuration or a template is invalid
    pub fn new(config: &SinkConfig, fs: Arc<dyn RemoteFileSystem>) -> Result<Self> {
        Self::with_options(config, fs, PoolOptions::from_config(config))
    }

    /// Create an emitter with explicit pool options
    ///
    /// Templates still come from `config`; timing and open policy from `options`.
    pub fn with_options(
        config: &SinkConfig,
        fs: Arc<dyn RemoteFileSystem>,
        options: PoolOptions,
    ) -> Result<Self> {
        config.validate()?;

        let path = Template::parse(config.path.as_str())?;
        let message_format = config
            .message_format
            .as_deref()
            .map(Template::parse)
            .transpose()?;

        info!(
            filesystem = fs.name(),
            path = %path.as_str(),
            flush_interval_secs = options.flush_interval.as_secs(),
            enable_append = options.enable_append,
            enable_reopen = options.enable_reopen,
            "HDFS emitter configured"
        );

        Ok(Self {
            path,
            message_format,
            pool: Mutex::new(HandlePool::new(Arc::clone(&fs), options)),
            fs,
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Connect through `connector` using the remote settings in `config`
    ///
    /// # Errors
    /// Returns `SinkError::Config` for invalid settings and `SinkError::Io`
    /// if the connection fails
    pub async fn connect(config: &SinkConfig, connector: &dyn Connector) -> Result<Self> {
        config.validate()?;

        let conf = RemoteConf::new(config.remote_uri.as_str())
            .with_resources(config.hadoop_config_resources.clone());
        debug!(uri = %conf.uri, resources = conf.resources.len(), "Connecting to remote filesystem");

        let fs = connector.connect(&conf).await?;
        Self::new(config, fs)
    }

    /// Resolve the output path for an event
    pub fn render_path(&self, msg: &Message) -> Result<String> {
        let path = self.path.render(msg);
        if path.trim().is_empty() {
            return Err(SinkError::EmptyPath);
        }
        Ok(path)
    }

    /// Resolve the record for an event, always newline-terminated
    pub fn render_payload(&self, msg: &Message) -> Result<String> {
        let mut payload = match &self.message_format {
            Some(template) => template.render(msg),
            None => msg
                .to_json()
                .map_err(|e| SinkError::Serialization(e.to_string()))?,
        };
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        Ok(payload)
    }

    /// Write one event
    ///
    /// Errors from opening or writing are returned to the caller; flush and
    /// close problems are logged only.
    pub async fn write(&self, msg: &Message) -> Result<()> {
        let started = std::time::Instant::now();

        match self.write_record(msg).await {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_written(started.elapsed().as_secs_f64());
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_write_failure(e.reason());
                Err(e)
            }
        }
    }

    async fn write_record(&self, msg: &Message) -> Result<()> {
        let path = self.render_path(msg)?;
        let payload = self.render_payload(msg)?;

        let mut pool = self.pool.lock().await;
        let flush_on_write = pool.options().flush_on_write();

        let handle = pool.get_or_open(&path).await?;
        if let Err(source) = handle.write(payload.as_bytes()).await {
            // Don't keep a stream that already failed; the next event reopens it
            pool.evict(&path).await;
            return Err(SinkError::Write { path, source });
        }

        if flush_on_write {
            handle.flush().await;
        }

        let now = Instant::now();
        if !flush_on_write {
            pool.run_flush_cycle(now).await;
        }
        pool.run_stale_eviction_cycle(now).await;

        Ok(())
    }

    /// Number of open handles
    pub async fn open_handles(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Close every open handle
    ///
    /// Returns the number of handles that closed cleanly.
    pub async fn close(&self) -> usize {
        self.pool.lock().await.close_all().await
    }

    /// Events written successfully
    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Events that failed to write
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Emitter for HdfsEmitter {
    fn name(&self) -> &'static str {
        "hdfs"
    }

    async fn emit(&self, messages: &[Message]) -> std::result::Result<(), PluginError> {
        let mut failures = 0usize;
        let mut first_error = None;

        for msg in messages {
            if let Err(e) = self.write(msg).await {
                error!(event_id = %msg.id, error = %e, "Failed to write event");
                failures += 1;
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) if messages.len() == 1 => Err(e.into()),
            Some(e) => Err(PluginError::Send(format!(
                "{failures} of {} events failed, first error: {e}",
                messages.len()
            ))),
        }
    }

    async fn health(&self) -> bool {
        match self.fs.exists("/").await {
            Ok(_) => true,
            Err(e) => {
                debug!(filesystem = self.fs.name(), error = %e, "Health check failed");
                false
            }
        }
    }

    async fn shutdown(&self) -> std::result::Result<(), PluginError> {
        let closed = self.close().await;
        info!(
            closed,
            written = self.written_count(),
            failed = self.failed_count(),
            "HDFS emitter shut down"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::remote::{MemoryConnector, MemoryFileSystem};
    use bytes::Bytes;
    use std::time::Duration;

    fn emitter(fs: &MemoryFileSystem, config: SinkConfig) -> HdfsEmitter {
        HdfsEmitter::new(&config, Arc::new(fs.clone())).unwrap()
    }

    fn event(source: &str, body: &str) -> Message {
        Message::with_id("e1", 0, source, "log", Bytes::from(body.to_string()))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let fs = MemoryFileSystem::new();
        let err = HdfsEmitter::new(&SinkConfig::default(), Arc::new(fs)).err().unwrap();
        assert!(matches!(err, SinkError::Config(_)));
    }

    #[test]
    fn test_payload_gets_exactly_one_newline() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(&fs, SinkConfig::new("/a.log").message_format("%{payload}"));

        assert_eq!(emitter.render_payload(&event("s", "hello")).unwrap(), "hello\n");
        assert_eq!(emitter.render_payload(&event("s", "hello\n")).unwrap(), "hello\n");
    }

    #[test]
    fn test_default_payload_is_json() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(&fs, SinkConfig::new("/a.log"));

        let payload = emitter.render_payload(&event("web", "GET /")).unwrap();
        assert!(payload.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(payload.trim_end()).unwrap();
        assert_eq!(value["source"], "web");
        assert_eq!(value["payload"], "GET /");
    }

    #[test]
    fn test_empty_path_rejected() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(&fs, SinkConfig::new("%{dir}"));
        let msg = event("s", "x").with_metadata("dir", "");

        assert!(matches!(emitter.render_path(&msg), Err(SinkError::EmptyPath)));
    }

    #[tokio::test]
    async fn test_routes_events_by_path_template() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(
            &fs,
            SinkConfig::new("/logs/%{source}.log")
                .message_format("%{payload}")
                .flush_interval_secs(0),
        );

        let events = vec![event("a", "one"), event("b", "two"), event("a", "three")];
        emitter.emit(&events).await.unwrap();

        assert_eq!(fs.contents_str("/logs/a.log").unwrap(), "one\nthree\n");
        assert_eq!(fs.contents_str("/logs/b.log").unwrap(), "two\n");
        assert_eq!(emitter.open_handles().await, 2);
        assert_eq!(emitter.written_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_interval_flushes_every_write() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(
            &fs,
            SinkConfig::new("/a.log")
                .message_format("%{payload}")
                .flush_interval_secs(0),
        );

        emitter.write(&event("s", "one")).await.unwrap();
        assert_eq!(fs.contents_str("/a.log").unwrap(), "one\n");
        emitter.write(&event("s", "two")).await.unwrap();
        assert_eq!(fs.calls().hflush, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_waits_for_interval() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(
            &fs,
            SinkConfig::new("/a.log")
                .message_format("%{payload}")
                .flush_interval_secs(5),
        );

        emitter.write(&event("s", "one")).await.unwrap();
        assert_eq!(fs.calls().hflush, 0);
        assert_eq!(fs.contents_str("/a.log").unwrap(), "");

        tokio::time::advance(Duration::from_secs(5)).await;
        emitter.write(&event("s", "two")).await.unwrap();
        assert_eq!(fs.calls().hflush, 1);
        assert_eq!(fs.contents_str("/a.log").unwrap(), "one\ntwo\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_path_is_evicted_by_later_events() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(
            &fs,
            SinkConfig::new("/logs/%{source}.log").message_format("%{payload}"),
        );

        emitter.write(&event("quiet", "once")).await.unwrap();
        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(10)).await;
            emitter.write(&event("busy", "tick")).await.unwrap();
        }

        assert_eq!(emitter.open_handles().await, 1);
        // closing published the idle file's data
        assert_eq!(fs.contents_str("/logs/quiet.log").unwrap(), "once\n");
        assert!(!fs.is_leased("/logs/quiet.log"));
    }

    #[tokio::test]
    async fn test_refusal_propagates() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/a.log", "old\n");
        let emitter = emitter(&fs, SinkConfig::new("/a.log"));

        let err = emitter.write(&event("s", "x")).await.unwrap_err();
        assert!(matches!(err, SinkError::RefuseReopen { .. }));

        // same failure on every event for the broken path
        let err = emitter.emit(&[event("s", "y")]).await.unwrap_err();
        assert!(matches!(err, PluginError::Send(_)));
        assert_eq!(emitter.failed_count(), 2);
        assert_eq!(emitter.open_handles().await, 0);
    }

    #[tokio::test]
    async fn test_failed_write_drops_handle() {
        let fs = MemoryFileSystem::new();
        fs.fail_write("/a.log");
        let emitter = emitter(&fs, SinkConfig::new("/a.log").enable_append(true));

        let err = emitter.write(&event("s", "x")).await.unwrap_err();
        assert!(matches!(err, SinkError::Write { .. }));
        assert_eq!(emitter.open_handles().await, 0);
        assert!(!fs.is_leased("/a.log"));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/logs/old.log", "");
        let emitter = emitter(
            &fs,
            SinkConfig::new("/logs/%{source}.log").message_format("%{payload}"),
        );

        let result = emitter
            .emit(&[event("old", "x"), event("new", "y"), event("old", "z")])
            .await;

        match result {
            Err(PluginError::Send(msg)) => assert!(msg.starts_with("2 of 3 events failed")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(emitter.written_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let fs = MemoryFileSystem::new();
        let emitter = emitter(
            &fs,
            SinkConfig::new("/logs/%{source}.log").message_format("%{payload}"),
        );
        emitter
            .emit(&[event("a", "1"), event("b", "2")])
            .await
            .unwrap();

        emitter.shutdown().await.unwrap();

        assert_eq!(emitter.open_handles().await, 0);
        assert_eq!(fs.calls().close, 2);
        assert_eq!(fs.contents_str("/logs/a.log").unwrap(), "1\n");
        assert_eq!(fs.contents_str("/logs/b.log").unwrap(), "2\n");
    }

    #[tokio::test]
    async fn test_connect_and_health() {
        let fs = MemoryFileSystem::new();
        let config = SinkConfig::new("/a.log");
        let emitter = HdfsEmitter::connect(&config, &MemoryConnector::new(fs))
            .await
            .unwrap();

        assert_eq!(emitter.name(), "hdfs");
        assert!(emitter.health().await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_share_one_handle() {
        let fs = MemoryFileSystem::new();
        let emitter = Arc::new(emitter(
            &fs,
            SinkConfig::new("/a.log")
                .message_format("%{payload}")
                .flush_interval_secs(0),
        ));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let emitter = Arc::clone(&emitter);
            tasks.push(tokio::spawn(async move {
                for j in 0..10 {
                    emitter
                        .write(&event("s", &format!("{i}-{j}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(fs.calls().create, 1);
        assert_eq!(fs.contents_str("/a.log").unwrap().lines().count(), 80);
    }
}
