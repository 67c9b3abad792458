//! Emitter seam
//!
//! Emitters receive Messages from the event pipeline and deliver them to a
//! destination. The HDFS sink is one emitter; the pipeline that feeds it is
//! not part of this crate.

pub mod hdfs;

use crate::error::PluginError;
use crate::message::Message;
use async_trait::async_trait;

pub use hdfs::HdfsEmitter;

/// Emitter trait - sends Messages to a destination
///
/// # Example
///
/// ```ignore
/// struct CountingEmitter(AtomicU64);
///
/// #[async_trait]
/// impl Emitter for CountingEmitter {
///     fn name(&self) -> &'static str { "counting" }
///
///     async fn emit(&self, messages: &[Message]) -> Result<(), PluginError> {
///         self.0.fetch_add(messages.len() as u64, Ordering::Relaxed);
///         Ok(())
///     }
///
///     async fn health(&self) -> bool { true }
/// }
/// ```
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Emitter name for identification and logging
    fn name(&self) -> &'static str;

    /// Deliver messages, in order
    async fn emit(&self, messages: &[Message]) -> Result<(), PluginError>;

    /// Returns true if the destination is reachable
    async fn health(&self) -> bool;

    /// Graceful shutdown
    ///
    /// Called when the pipeline is shutting down to flush buffers, close files, etc.
    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
