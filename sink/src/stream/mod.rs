//! Output-stream lifecycle
//!
//! - [`handle`]: one open remote stream and its liveness flag
//! - [`lease`]: recovering leases left behind by crashed writers
//! - [`pool`]: the path → handle registry and its flush/eviction cycles

pub mod handle;
pub mod lease;
pub mod pool;

pub use handle::{FlushStrategy, OutputHandle};
pub use lease::{LeaseRecovery, LeaseRecoveryPolicy};
pub use pool::{HandlePool, OpenMode, PoolOptions, STALE_CLEANUP_INTERVAL};
