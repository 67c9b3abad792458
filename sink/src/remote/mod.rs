//! Remote filesystem capability
//!
//! The sink never talks to a concrete distributed filesystem client directly.
//! It is handed a [`RemoteFileSystem`], which opens [`RemoteStream`]s and
//! exposes the lease operations needed to take over files left behind by
//! crashed writers.
//!
//! What a client can do is declared once through [`Capabilities`] instead of
//! being probed per call.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;

pub use local::{LocalConnector, LocalFileSystem};
pub use memory::{Calls, MemoryConnector, MemoryFileSystem};

/// Optional features of a remote filesystem client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Streams support `hflush`, making written bytes visible to readers
    pub durable_flush: bool,
    /// `is_file_closed` is implemented
    pub file_closed_query: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            durable_flush: true,
            file_closed_query: true,
        }
    }
}

/// An open remote write stream
#[async_trait]
pub trait RemoteStream: Send {
    /// Write the whole buffer
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Make written bytes visible to new readers
    async fn hflush(&mut self) -> io::Result<()>;

    /// Flush the client-side buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Sync flushed data to replicas
    async fn sync(&mut self) -> io::Result<()>;

    /// Close the stream and release the writer lease
    async fn close(&mut self) -> io::Result<()>;
}

/// Remote filesystem client
#[async_trait]
pub trait RemoteFileSystem: Send + Sync {
    /// Client name for identification and logging
    fn name(&self) -> &'static str;

    /// What this client supports
    fn capabilities(&self) -> Capabilities;

    /// Whether `path` exists
    async fn exists(&self, path: &str) -> io::Result<bool>;

    /// Create `path`, truncating an existing file when `overwrite` is set
    async fn create(&self, path: &str, overwrite: bool) -> io::Result<Box<dyn RemoteStream>>;

    /// Open an existing file for append
    ///
    /// Fails with an I/O error while another writer holds the lease.
    async fn append(&self, path: &str) -> io::Result<Box<dyn RemoteStream>>;

    /// Ask the filesystem to recover the lease on `path`
    ///
    /// Returns `Ok(true)` once the file is closed and the lease released.
    async fn recover_lease(&self, path: &str) -> io::Result<bool>;

    /// Whether `path` has been closed by its last writer
    ///
    /// Only called when [`Capabilities::file_closed_query`] is set.
    async fn is_file_closed(&self, _path: &str) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "is_file_closed is not supported by this client",
        ))
    }
}

/// Connection settings for a remote filesystem
#[derive(Debug, Clone, Default)]
pub struct RemoteConf {
    /// Filesystem URI, e.g. `hdfs://namenode:8020` or `file:///var/spool`
    pub uri: String,
    /// Configuration resources merged into the client before connecting, in order
    pub resources: Vec<String>,
}

impl RemoteConf {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            resources: Vec::new(),
        }
    }

    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }
}

/// Builds a connected client from a [`RemoteConf`]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, conf: &RemoteConf) -> io::Result<Arc<dyn RemoteFileSystem>>;
}
