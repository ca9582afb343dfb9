//! Critical section
//!
//! Replay of the change log and commit persistence run under a single
//! critical section: a process-local mutex first, then (when the process is
//! part of a cluster) the cluster-wide commit lock. Holding a
//! [`SectionGuard`] is the proof required to mutate the timeline.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use versa_cluster::ClusterCoordinator;
use versa_core::Result;

/// Local mutex plus optional cluster lock
pub struct CriticalSection {
    local: Mutex<()>,
    cluster: Option<Arc<dyn ClusterCoordinator>>,
    lock_timeout: Duration,
}

impl CriticalSection {
    /// Section for a standalone process
    pub fn local() -> Self {
        Self {
            local: Mutex::new(()),
            cluster: None,
            lock_timeout: Duration::ZERO,
        }
    }

    /// Section that also takes the cluster lock
    pub fn clustered(cluster: Arc<dyn ClusterCoordinator>, lock_timeout: Duration) -> Self {
        Self {
            local: Mutex::new(()),
            cluster: Some(cluster),
            lock_timeout,
        }
    }

    /// Enter the section
    ///
    /// # Errors
    ///
    /// `ReplicationStall` when the cluster lock is not acquired within the
    /// configured timeout. The local mutex is released again in that case.
    pub fn enter(&self) -> Result<SectionGuard<'_>> {
        let local = self.local.lock();
        if let Some(cluster) = &self.cluster {
            cluster.lock(self.lock_timeout)?;
        }
        Ok(SectionGuard {
            cluster: self.cluster.as_deref(),
            _local: local,
        })
    }
}

impl std::fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticalSection")
            .field("clustered", &self.cluster.is_some())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

/// Proof of holding the critical section
///
/// Dropping the guard releases the cluster lock, then the local mutex.
pub struct SectionGuard<'a> {
    cluster: Option<&'a dyn ClusterCoordinator>,
    _local: MutexGuard<'a, ()>,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        if let Some(cluster) = self.cluster {
            if let Err(e) = cluster.unlock() {
                warn!(error = %e, "Failed to release cluster lock");
            }
        }
    }
}
