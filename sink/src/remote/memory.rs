//! In-memory remote filesystem
//!
//! Keeps file contents in process memory and models the parts of a
//! distributed filesystem the sink cares about: single-writer leases,
//! lease recovery, and the two flush flavours. Faults can be injected per
//! path so the sink's recovery paths can be exercised without a cluster.
//!
//! Data written to a stream only becomes visible through [`MemoryFileSystem::contents`]
//! after a flush (`hflush`, or `flush` + `sync`) or a close.

use super::{Capabilities, Connector, RemoteConf, RemoteFileSystem, RemoteStream};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct FileState {
    data: Vec<u8>,
    /// A writer currently holds the lease
    leased: bool,
}

#[derive(Debug, Default)]
struct Faults {
    /// Paths whose lease is held by a writer outside this process
    foreign_leases: HashMap<String, LeaseFault>,
    /// Paths whose streams fail on close
    failing_close: Vec<String>,
    /// Paths whose streams fail on write
    failing_write: Vec<String>,
    /// All flushes fail
    failing_flush: bool,
}

#[derive(Debug, Clone, Copy)]
struct LeaseFault {
    /// `recover_lease` calls left before it reports success
    recover_after: Option<u32>,
    /// `is_file_closed` reports true
    closed: bool,
}

#[derive(Debug, Default)]
struct CallCounts {
    exists: AtomicU64,
    create: AtomicU64,
    overwrite: AtomicU64,
    append: AtomicU64,
    recover_lease: AtomicU64,
    is_file_closed: AtomicU64,
    hflush: AtomicU64,
    flush: AtomicU64,
    sync: AtomicU64,
    close: AtomicU64,
}

impl CallCounts {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Calls {
        let get = |c: &AtomicU64| c.load(Ordering::SeqCst);
        Calls {
            exists: get(&self.exists),
            create: get(&self.create),
            overwrite: get(&self.overwrite),
            append: get(&self.append),
            recover_lease: get(&self.recover_lease),
            is_file_closed: get(&self.is_file_closed),
            hflush: get(&self.hflush),
            flush: get(&self.flush),
            sync: get(&self.sync),
            close: get(&self.close),
        }
    }
}

/// Number of calls made to each operation so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub exists: u64,
    /// Includes overwrites
    pub create: u64,
    pub overwrite: u64,
    pub append: u64,
    pub recover_lease: u64,
    pub is_file_closed: u64,
    pub hflush: u64,
    pub flush: u64,
    pub sync: u64,
    pub close: u64,
}

#[derive(Debug)]
struct Inner {
    files: Mutex<HashMap<String, FileState>>,
    faults: Mutex<Faults>,
    capabilities: Capabilities,
    calls: CallCounts,
}

/// In-memory filesystem with lease semantics and fault injection
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    inner: Arc<Inner>,
}

impl MemoryFileSystem {
    /// Create an empty filesystem with every capability enabled
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    /// Create an empty filesystem advertising the given capabilities
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            inner: Arc::new(Inner {
                files: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                capabilities,
                calls: CallCounts::default(),
            }),
        }
    }

    /// Seed a closed file with existing contents
    pub fn insert_file(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.inner.files.lock().insert(
            path.into(),
            FileState {
                data: data.into(),
                leased: false,
            },
        );
    }

    /// Visible contents of `path`
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.files.lock().get(path).map(|f| f.data.clone())
    }

    /// Visible contents of `path` as UTF-8 text
    pub fn contents_str(&self, path: &str) -> Option<String> {
        self.contents(path)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    /// Whether a writer currently holds the lease on `path`
    pub fn is_leased(&self, path: &str) -> bool {
        let foreign = self.inner.faults.lock().foreign_leases.contains_key(path);
        foreign || self.inner.files.lock().get(path).is_some_and(|f| f.leased)
    }

    /// Simulate a crashed writer holding the lease on `path`
    ///
    /// `recover_after` is the number of `recover_lease` calls that report
    /// failure before one succeeds; `None` means recovery never succeeds.
    pub fn hold_lease(&self, path: impl Into<String>, recover_after: Option<u32>) {
        let path = path.into();
        self.inner.files.lock().entry(path.clone()).or_default();
        self.inner.faults.lock().foreign_leases.insert(
            path,
            LeaseFault {
                recover_after,
                closed: false,
            },
        );
    }

    /// Simulate the foreign writer's file reaching the closed state
    ///
    /// `is_file_closed` then reports true and the next `recover_lease` succeeds.
    pub fn mark_closed(&self, path: &str) {
        if let Some(fault) = self.inner.faults.lock().foreign_leases.get_mut(path) {
            fault.closed = true;
        }
    }

    /// Streams opened on `path` fail on close
    pub fn fail_close(&self, path: impl Into<String>) {
        self.inner.faults.lock().failing_close.push(path.into());
    }

    /// Streams opened on `path` fail on write
    pub fn fail_write(&self, path: impl Into<String>) {
        self.inner.faults.lock().failing_write.push(path.into());
    }

    /// Every flush fails
    pub fn fail_flush(&self) {
        self.inner.faults.lock().failing_flush = true;
    }

    /// Per-operation call counts
    pub fn calls(&self) -> Calls {
        self.inner.calls.snapshot()
    }

    fn open_stream(&self, path: &str) -> Box<dyn RemoteStream> {
        Box::new(MemoryStream {
            fs: self.clone(),
            path: path.to_string(),
            pending: Vec::new(),
            closed: false,
        })
    }

    fn lease_conflict(path: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("lease on {path} is held by another writer"),
        )
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFileSystem for MemoryFileSystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    async fn exists(&self, path: &str) -> io::Result<bool> {
        CallCounts::bump(&self.inner.calls.exists);
        Ok(self.inner.files.lock().contains_key(path))
    }

    async fn create(&self, path: &str, overwrite: bool) -> io::Result<Box<dyn RemoteStream>> {
        CallCounts::bump(&self.inner.calls.create);
        if overwrite {
            CallCounts::bump(&self.inner.calls.overwrite);
        }
        if self.inner.faults.lock().foreign_leases.contains_key(path) {
            return Err(Self::lease_conflict(path));
        }

        let mut files = self.inner.files.lock();
        match files.get_mut(path) {
            Some(file) if file.leased => return Err(Self::lease_conflict(path)),
            Some(_) if !overwrite => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{path} already exists"),
                ));
            }
            Some(file) => {
                file.data.clear();
                file.leased = true;
            }
            None => {
                files.insert(
                    path.to_string(),
                    FileState {
                        data: Vec::new(),
                        leased: true,
                    },
                );
            }
        }
        drop(files);

        Ok(self.open_stream(path))
    }

    async fn append(&self, path: &str) -> io::Result<Box<dyn RemoteStream>> {
        CallCounts::bump(&self.inner.calls.append);
        if self.inner.faults.lock().foreign_leases.contains_key(path) {
            return Err(Self::lease_conflict(path));
        }

        let mut files = self.inner.files.lock();
        let file = files.get_mut(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{path} does not exist"))
        })?;
        if file.leased {
            return Err(Self::lease_conflict(path));
        }
        file.leased = true;
        drop(files);

        Ok(self.open_stream(path))
    }

    async fn recover_lease(&self, path: &str) -> io::Result<bool> {
        CallCounts::bump(&self.inner.calls.recover_lease);
        let mut faults = self.inner.faults.lock();
        let Some(fault) = faults.foreign_leases.get_mut(path) else {
            return Ok(true);
        };

        if fault.closed {
            faults.foreign_leases.remove(path);
            return Ok(true);
        }

        match fault.recover_after {
            Some(0) => {
                faults.foreign_leases.remove(path);
                Ok(true)
            }
            Some(n) => {
                fault.recover_after = Some(n - 1);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn is_file_closed(&self, path: &str) -> io::Result<bool> {
        CallCounts::bump(&self.inner.calls.is_file_closed);
        if !self.inner.capabilities.file_closed_query {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "is_file_closed is not supported by this client",
            ));
        }
        if let Some(fault) = self.inner.faults.lock().foreign_leases.get(path) {
            return Ok(fault.closed);
        }
        Ok(!self.inner.files.lock().get(path).is_some_and(|f| f.leased))
    }
}

/// Stream over a [`MemoryFileSystem`] file
struct MemoryStream {
    fs: MemoryFileSystem,
    path: String,
    /// Written but not yet flushed
    pending: Vec<u8>,
    closed: bool,
}

impl MemoryStream {
    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream for {} is closed", self.path),
            ));
        }
        Ok(())
    }

    fn publish(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(file) = self.fs.inner.files.lock().get_mut(&self.path) {
            file.data.append(&mut self.pending);
        }
    }

    fn flush_fault(&self) -> io::Result<()> {
        if self.fs.inner.faults.lock().failing_flush {
            return Err(io::Error::other("injected flush failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStream for MemoryStream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        if self.fs.inner.faults.lock().failing_write.contains(&self.path) {
            return Err(io::Error::other("injected write failure"));
        }
        self.pending.extend_from_slice(buf);
        Ok(())
    }

    async fn hflush(&mut self) -> io::Result<()> {
        CallCounts::bump(&self.fs.inner.calls.hflush);
        self.ensure_open()?;
        if !self.fs.inner.capabilities.durable_flush {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "hflush is not supported by this client",
            ));
        }
        self.flush_fault()?;
        self.publish();
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        CallCounts::bump(&self.fs.inner.calls.flush);
        self.ensure_open()?;
        self.flush_fault()
    }

    async fn sync(&mut self) -> io::Result<()> {
        CallCounts::bump(&self.fs.inner.calls.sync);
        self.ensure_open()?;
        self.flush_fault()?;
        self.publish();
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        CallCounts::bump(&self.fs.inner.calls.close);
        self.ensure_open()?;
        self.closed = true;
        self.publish();
        if let Some(file) = self.fs.inner.files.lock().get_mut(&self.path) {
            file.leased = false;
        }
        if self.fs.inner.faults.lock().failing_close.contains(&self.path) {
            return Err(io::Error::other("injected close failure"));
        }
        Ok(())
    }
}

/// Connector that hands out clones of one shared [`MemoryFileSystem`]
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    fs: MemoryFileSystem,
}

impl MemoryConnector {
    pub fn new(fs: MemoryFileSystem) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _conf: &RemoteConf) -> io::Result<Arc<dyn RemoteFileSystem>> {
        Ok(Arc::new(self.fs.clone()))
    }
}
