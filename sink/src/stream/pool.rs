//! Handle pool - the registry of open output streams
//!
//! Maps each resolved path to at most one [`OutputHandle`]. Handles are
//! opened lazily on first write and reclaimed by two time-gated cycles that
//! run on event arrival rather than on a background timer, so an idle sink
//! does no work:
//!
//! - **flush cycle**: every `flush_interval`, flush every open handle
//! - **stale-eviction cycle**: every 10s, close handles not written to since
//!   the previous cycle, then clear the `active` flag on the survivors
//!
//! A handle written just before an eviction cycle survives it and is only
//! closed at the following cycle if nothing was written in between.
//!
//! The pool is single-writer: callers serialize access (see
//! [`HdfsEmitter`](crate::emit::HdfsEmitter), which keeps it behind a mutex).

use crate::config::SinkConfig;
use crate::error::{Result, SinkError};
use crate::metrics;
use crate::remote::{RemoteFileSystem, RemoteStream};
use crate::stream::handle::{FlushStrategy, OutputHandle};
use crate::stream::lease::{LeaseRecovery, LeaseRecoveryPolicy};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between stale-eviction cycles
pub const STALE_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

/// Pool behaviour
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Zero disables the flush cycle; the caller flushes after each write instead
    pub flush_interval: Duration,
    pub stale_cleanup_interval: Duration,
    /// Append to files that already exist
    pub enable_append: bool,
    /// Overwrite files that already exist when append is disabled
    pub enable_reopen: bool,
    pub lease_recovery: LeaseRecoveryPolicy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(crate::config::DEFAULT_FLUSH_INTERVAL_SECS),
            stale_cleanup_interval: STALE_CLEANUP_INTERVAL,
            enable_append: false,
            enable_reopen: false,
            lease_recovery: LeaseRecoveryPolicy::default(),
        }
    }
}

impl PoolOptions {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            enable_append: config.enable_append,
            enable_reopen: config.enable_reopen,
            ..Self::default()
        }
    }

    /// True when every write is flushed immediately
    pub fn flush_on_write(&self) -> bool {
        self.flush_interval.is_zero()
    }
}

/// How a stream was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Create,
    Append,
    Overwrite,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Create => "create",
            OpenMode::Append => "append",
            OpenMode::Overwrite => "overwrite",
        }
    }
}

/// Decides how to open a path and performs the open
struct Opener {
    fs: Arc<dyn RemoteFileSystem>,
    lease: LeaseRecovery,
    enable_append: bool,
    enable_reopen: bool,
}

impl Opener {
    async fn open(&self, path: &str) -> Result<(Box<dyn RemoteStream>, OpenMode)> {
        let exists = self.fs.exists(path).await.map_err(|source| SinkError::Open {
            path: path.to_string(),
            source,
        })?;

        if !exists {
            let stream = self.create(path, false).await?;
            return Ok((stream, OpenMode::Create));
        }

        if self.enable_append {
            let stream = self.append(path).await?;
            return Ok((stream, OpenMode::Append));
        }

        if self.enable_reopen {
            warn!(path = %path, "Overwriting existing file (enable_reopen)");
            let stream = self.create(path, true).await?;
            return Ok((stream, OpenMode::Overwrite));
        }

        Err(SinkError::RefuseReopen {
            path: path.to_string(),
        })
    }

    async fn create(&self, path: &str, overwrite: bool) -> Result<Box<dyn RemoteStream>> {
        self.fs
            .create(path, overwrite)
            .await
            .map_err(|source| SinkError::Open {
                path: path.to_string(),
                source,
            })
    }

    /// append, then on failure: recover lease, append once more
    async fn append(&self, path: &str) -> Result<Box<dyn RemoteStream>> {
        let first_error = match self.fs.append(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        warn!(path = %path, error = %first_error, "Append failed, attempting lease recovery");
        let recovered = self.lease.recover(self.fs.as_ref(), path).await;

        self.fs.append(path).await.map_err(|source| {
            warn!(path = %path, recovered, error = %source, "Append failed after lease recovery");
            SinkError::Append {
                path: path.to_string(),
                source,
            }
        })
    }
}

/// Registry of open output handles keyed by path
pub struct HandlePool {
    opener: Opener,
    options: PoolOptions,
    strategy: FlushStrategy,
    handles: HashMap<String, OutputHandle>,
    next_id: u64,
    last_flush_cycle: Instant,
    last_stale_cleanup_cycle: Instant,
}

impl HandlePool {
    /// Create an empty pool; both cycle clocks start now
    pub fn new(fs: Arc<dyn RemoteFileSystem>, options: PoolOptions) -> Self {
        let strategy = FlushStrategy::for_capabilities(fs.capabilities());
        let now = Instant::now();

        debug!(
            filesystem = fs.name(),
            strategy = ?strategy,
            flush_interval_secs = options.flush_interval.as_secs(),
            "Handle pool created"
        );

        Self {
            opener: Opener {
                fs,
                lease: LeaseRecovery::new(options.lease_recovery),
                enable_append: options.enable_append,
                enable_reopen: options.enable_reopen,
            },
            options,
            strategy,
            handles: HashMap::new(),
            next_id: 1,
            last_flush_cycle: now,
            last_stale_cleanup_cycle: now,
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Flush strategy chosen for this pool's filesystem
    pub fn flush_strategy(&self) -> FlushStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.handles.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&OutputHandle> {
        self.handles.get(path)
    }

    /// Paths with an open handle, in no particular order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    /// Return the handle for `path`, opening the remote file if needed
    ///
    /// A cached handle is returned untouched. Otherwise a missing file is
    /// created; an existing one is appended to (`enable_append`, with one
    /// lease-recovery retry), overwritten (`enable_reopen`), or refused.
    /// On error nothing is added to the pool.
    pub async fn get_or_open(&mut self, path: &str) -> Result<&mut OutputHandle> {
        match self.handles.entry(path.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let (stream, mode) = self.opener.open(path).await?;

                let id = self.next_id;
                self.next_id += 1;

                info!(path = %path, id, mode = mode.as_str(), "Opened output file");
                metrics::try_record_opened(mode.as_str());

                metrics::try_inc_open_handles();
                Ok(entry.insert(OutputHandle::new(
                    id,
                    path.to_string(),
                    stream,
                    self.strategy,
                )))
            }
        }
    }

    /// Flush every handle if `flush_interval` has elapsed since the last cycle
    ///
    /// No-op when the flush interval is zero. Returns whether the cycle ran.
    pub async fn run_flush_cycle(&mut self, now: Instant) -> bool {
        if self.options.flush_on_write() {
            return false;
        }
        if now.saturating_duration_since(self.last_flush_cycle) < self.options.flush_interval {
            return false;
        }

        let mut failed = 0usize;
        for handle in self.handles.values_mut() {
            if !handle.flush().await {
                failed += 1;
            }
        }
        self.last_flush_cycle = now;

        debug!(handles = self.handles.len(), failed, "Flush cycle");
        metrics::try_record_flush_cycle();
        true
    }

    /// Close handles idle since the previous cycle, then reset the rest
    ///
    /// No-op until `stale_cleanup_interval` has elapsed. Returns the number
    /// of handles evicted.
    pub async fn run_stale_eviction_cycle(&mut self, now: Instant) -> usize {
        if now.saturating_duration_since(self.last_stale_cleanup_cycle)
            < self.options.stale_cleanup_interval
        {
            return 0;
        }

        let stale: Vec<String> = self
            .handles
            .iter()
            .filter(|(_, handle)| !handle.is_active())
            .map(|(path, _)| path.clone())
            .collect();

        for path in &stale {
            if let Some(handle) = self.handles.remove(path) {
                debug!(path = %path, id = handle.id(), "Evicting stale handle");
                handle.close().await;
            }
        }

        for handle in self.handles.values_mut() {
            handle.set_active(false);
        }
        self.last_stale_cleanup_cycle = now;

        if !stale.is_empty() {
            info!(
                evicted = stale.len(),
                remaining = self.handles.len(),
                "Closed stale handles"
            );
            metrics::try_record_evicted(stale.len());
            metrics::try_dec_open_handles(stale.len());
        }

        stale.len()
    }

    /// Remove and close the handle for `path`, if any
    pub async fn evict(&mut self, path: &str) -> bool {
        let Some(handle) = self.handles.remove(path) else {
            return false;
        };
        handle.close().await;
        metrics::try_dec_open_handles(1);
        true
    }

    /// Close every handle; one failing close does not stop the others
    ///
    /// Returns the number of handles that closed cleanly.
    pub async fn close_all(&mut self) -> usize {
        let total = self.handles.len();
        let mut closed = 0usize;

        for (_, handle) in self.handles.drain() {
            if handle.close().await {
                closed += 1;
            }
        }

        info!(total, closed, failed = total - closed, "Closed all handles");
        metrics::try_dec_open_handles(total);
        closed
    }
}

impl std::fmt::Debug for HandlePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlePool")
            .field("filesystem", &self.opener.fs.name())
            .field("strategy", &self.strategy)
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}
