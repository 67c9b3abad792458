//! HDFS sink - appends log events to dynamically keyed files
//!
//! Each event is rendered through a path template and a payload template and
//! appended as one line to the resulting file on a remote filesystem. Open
//! files are pooled per path, flushed on a timer, and closed after two idle
//! eviction cycles. Files left open by a crashed writer are reclaimed through
//! lease recovery before appending.
//!
//! # Architecture
//!
//! ```text
//! Message ──► HdfsEmitter (templates) ──► HandlePool ──► OutputHandle ──► RemoteFileSystem
//!                                             │
//!                                             └─► LeaseRecovery
//! ```
//!
//! The filesystem is a trait so the pool runs unchanged against a real
//! cluster client, the local filesystem, or the in-memory test double.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod emit;
pub mod error;
pub mod message;
pub mod metrics;
pub mod metrics_server;
pub mod remote;
pub mod stream;
pub mod template;

pub use config::SinkConfig;
pub use emit::{Emitter, HdfsEmitter};
pub use error::{PluginError, Result, SinkError};
pub use message::Message;
pub use template::Template;
