//! Output handle - one open remote write stream owned by the pool

use crate::remote::{Capabilities, RemoteStream};
use std::io;
use tracing::{debug, warn};

/// How a handle makes written data visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStrategy {
    /// `hflush`: visible to readers without waiting on replica durability
    Durable,
    /// `flush` followed by `sync`, for clients without `hflush`
    Legacy,
}

impl FlushStrategy {
    /// Pick the strategy a client supports
    pub fn for_capabilities(capabilities: Capabilities) -> Self {
        if capabilities.durable_flush {
            FlushStrategy::Durable
        } else {
            FlushStrategy::Legacy
        }
    }
}

/// An open remote file plus its liveness flag
pub struct OutputHandle {
    id: u64,
    path: String,
    stream: Box<dyn RemoteStream>,
    strategy: FlushStrategy,
    active: bool,
}

impl OutputHandle {
    pub(crate) fn new(
        id: u64,
        path: String,
        stream: Box<dyn RemoteStream>,
        strategy: FlushStrategy,
    ) -> Self {
        Self {
            id,
            path,
            stream,
            strategy,
            active: false,
        }
    }

    /// Pool-assigned identifier, unique per opened handle
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Written to since the last stale-eviction cycle
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Append a record and mark the handle active
    pub async fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(payload).await?;
        self.active = true;
        Ok(())
    }

    /// Best-effort flush; failures are logged and swallowed
    ///
    /// Returns whether the flush succeeded.
    pub async fn flush(&mut self) -> bool {
        let result = match self.strategy {
            FlushStrategy::Durable => self.stream.hflush().await,
            FlushStrategy::Legacy => match self.stream.flush().await {
                Ok(()) => self.stream.sync().await,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path, strategy = ?self.strategy, error = %e, "Flush failed");
                false
            }
        }
    }

    /// Close the stream, logging (not returning) any failure
    ///
    /// Returns whether the close succeeded.
    pub async fn close(mut self) -> bool {
        match self.stream.close().await {
            Ok(()) => {
                debug!(path = %self.path, id = self.id, "Handle closed");
                true
            }
            Err(e) => {
                warn!(path = %self.path, id = self.id, error = %e, "Failed to close handle");
                false
            }
        }
    }
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("strategy", &self.strategy)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
