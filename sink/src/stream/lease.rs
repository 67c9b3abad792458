//! Lease recovery for files left open by crashed writers
//!
//! A distributed filesystem allows one writer per file. When that writer dies
//! without closing, its lease lingers until the namenode reclaims it, and
//! every append in the meantime fails. Recovery asks the filesystem to
//! reclaim the lease and then waits for the file to reach the closed state.
//!
//! Schedule, with the default policy:
//!
//! ```text
//! t=0     recover_lease ──► true: done
//!         sleep 4s
//! t=4     recover_lease ──► true: done, deadline passed: give up
//!         poll: sleep 1s, is_file_closed? (up to 61 times, early exit when closed)
//! t≈65    recover_lease ──► ...
//!         ... until 900s have elapsed
//! ```

use crate::metrics;
use crate::remote::RemoteFileSystem;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Timing for lease recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRecoveryPolicy {
    /// Give up once this much time has passed since the first attempt
    pub timeout: Duration,
    /// Pause between the first attempt and the retry loop
    pub first_pause: Duration,
    /// Pause between `is_file_closed` polls
    pub poll_interval: Duration,
    /// Polls per retry round
    pub polls_per_round: u32,
}

impl Default for LeaseRecoveryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            first_pause: Duration::from_secs(4),
            poll_interval: Duration::from_secs(1),
            polls_per_round: 61,
        }
    }
}

/// Drives lease recovery for one path at a time
#[derive(Debug, Clone, Default)]
pub struct LeaseRecovery {
    policy: LeaseRecoveryPolicy,
}

impl LeaseRecovery {
    pub fn new(policy: LeaseRecoveryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LeaseRecoveryPolicy {
        &self.policy
    }

    /// Recover the lease on `path`
    ///
    /// Returns `true` once the filesystem confirms recovery, `false` when the
    /// timeout elapses first. A `false` is not an error: the caller still
    /// retries its open once.
    pub async fn recover(&self, fs: &dyn RemoteFileSystem, path: &str) -> bool {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let can_query_closed = fs.capabilities().file_closed_query;

        info!(path = %path, "Recovering lease");

        if request(fs, path, 0).await {
            return finish(path, started, true);
        }
        sleep(self.policy.first_pause).await;

        let mut attempt = 1u32;
        loop {
            if request(fs, path, attempt).await {
                return finish(path, started, true);
            }
            if Instant::now() >= deadline {
                warn!(
                    path = %path,
                    attempts = attempt + 1,
                    timeout_secs = self.policy.timeout.as_secs(),
                    "Lease recovery timed out"
                );
                return finish(path, started, false);
            }

            for _ in 0..self.policy.polls_per_round {
                sleep(self.policy.poll_interval).await;
                if can_query_closed && is_closed(fs, path).await {
                    debug!(path = %path, "File reported closed, retrying recovery");
                    break;
                }
            }

            attempt += 1;
        }
    }
}

/// One recovery request; an RPC error counts as not recovered
async fn request(fs: &dyn RemoteFileSystem, path: &str, attempt: u32) -> bool {
    match fs.recover_lease(path).await {
        Ok(recovered) => {
            debug!(path = %path, attempt, recovered, "recover_lease");
            recovered
        }
        Err(e) => {
            warn!(path = %path, attempt, error = %e, "recover_lease failed");
            false
        }
    }
}

async fn is_closed(fs: &dyn RemoteFileSystem, path: &str) -> bool {
    match fs.is_file_closed(path).await {
        Ok(closed) => closed,
        Err(e) => {
            debug!(path = %path, error = %e, "is_file_closed failed");
            false
        }
    }
}

fn finish(path: &str, started: Instant, recovered: bool) -> bool {
    let elapsed = started.elapsed();
    if recovered {
        info!(path = %path, elapsed_ms = elapsed.as_millis() as u64, "Lease recovered");
    }
    metrics::try_record_lease_recovery(recovered);
    recovered
}
