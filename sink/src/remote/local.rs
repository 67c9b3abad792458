//! Local-disk filesystem
//!
//! Maps remote paths under a root directory on the local machine. Useful for
//! development and for running the sink without a cluster. Leases only exist
//! within this process: a path is leased while a stream on it is open.

use super::{Capabilities, Connector, RemoteConf, RemoteFileSystem, RemoteStream};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Filesystem rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
    leases: Arc<Mutex<HashSet<String>>>,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            leases: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a remote path under the root, rejecting `..` escapes
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path {path} escapes the filesystem root"),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn acquire(&self, path: &str) -> io::Result<()> {
        if !self.leases.lock().insert(path.to_string()) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("lease on {path} is held by another writer"),
            ));
        }
        Ok(())
    }

    async fn open(&self, path: &str, options: &OpenOptions) -> io::Result<Box<dyn RemoteStream>> {
        let local = self.resolve(path)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }

        self.acquire(path)?;
        match options.open(&local).await {
            Ok(file) => Ok(Box::new(LocalStream {
                path: path.to_string(),
                writer: Some(BufWriter::new(file)),
                leases: Arc::clone(&self.leases),
            })),
            Err(e) => {
                self.leases.lock().remove(path);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl RemoteFileSystem for LocalFileSystem {
    fn name(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable_flush: true,
            file_closed_query: true,
        }
    }

    async fn exists(&self, path: &str) -> io::Result<bool> {
        fs::try_exists(self.resolve(path)?).await
    }

    async fn create(&self, path: &str, overwrite: bool) -> io::Result<Box<dyn RemoteStream>> {
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        self.open(path, &options).await
    }

    async fn append(&self, path: &str) -> io::Result<Box<dyn RemoteStream>> {
        let mut options = OpenOptions::new();
        options.append(true);
        self.open(path, &options).await
    }

    async fn recover_lease(&self, path: &str) -> io::Result<bool> {
        Ok(!self.leases.lock().contains(path))
    }

    async fn is_file_closed(&self, path: &str) -> io::Result<bool> {
        Ok(!self.leases.lock().contains(path))
    }
}

struct LocalStream {
    path: String,
    writer: Option<BufWriter<File>>,
    leases: Arc<Mutex<HashSet<String>>>,
}

impl LocalStream {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream for {} is closed", self.path),
            )
        })
    }
}

#[async_trait]
impl RemoteStream for LocalStream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(buf).await
    }

    async fn hflush(&mut self) -> io::Result<()> {
        self.writer()?.flush().await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.writer()?.get_ref().sync_data().await
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut writer = self.writer.take().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream for {} is already closed", self.path),
            )
        })?;
        let result = writer.shutdown().await;
        self.leases.lock().remove(&self.path);
        result
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.leases.lock().remove(&self.path);
        }
    }
}

/// Connector for `file://` URIs or plain directory paths
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, conf: &RemoteConf) -> io::Result<Arc<dyn RemoteFileSystem>> {
        let root = conf.uri.strip_prefix("file://").unwrap_or(&conf.uri);
        if root.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "local filesystem needs a root directory",
            ));
        }

        // Hadoop resources carry cluster settings, which have no local meaning
        for resource in &conf.resources {
            debug!(resource = %resource, "Ignoring configuration resource for local filesystem");
        }

        fs::create_dir_all(root).await?;
        Ok(Arc::new(LocalFileSystem::new(root)))
    }
}
