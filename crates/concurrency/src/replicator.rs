//! Replication seam
//!
//! A [`Replicator`] brings the local timeline up to date with commits made
//! by other processes. The transaction manager calls it on a transaction's
//! first access, inside the commit critical section, and on resume.
//!
//! Implementations append records only through
//! [`Timeline::advance`](crate::Timeline::advance), which requires the
//! section guard.

use crate::section::SectionGuard;
use crate::timeline::{Timeline, TxRecord};
use std::sync::Arc;
use versa_core::{ChangeLogRow, CommitNumber, Result};

/// Strategy for discovering foreign commits
pub trait Replicator: Send + Sync {
    /// Replay everything newer than the timeline tail and return the newest
    /// record, which is `from` itself when nothing is newer
    ///
    /// Enters the critical section on its own when it has to replay.
    fn catch_up(&self, from: &Arc<TxRecord>) -> Result<Arc<TxRecord>>;

    /// Same as [`catch_up`](Self::catch_up) for a caller already holding
    /// the critical section
    ///
    /// Queries the durable log from one below the tail with row locking.
    fn catch_up_for_commit(&self, guard: &SectionGuard<'_>, from: &Arc<TxRecord>) -> Result<Arc<TxRecord>>;

    /// Announce a local commit to peers
    fn announce(&self, _guard: &SectionGuard<'_>, _number: CommitNumber, _rows: &[ChangeLogRow]) -> Result<()> {
        Ok(())
    }
}

/// Replicator for a process that is the only writer of its store
#[derive(Debug)]
pub struct LocalReplicator {
    timeline: Arc<Timeline>,
}

impl LocalReplicator {
    /// Replicator over `timeline`
    pub fn new(timeline: Arc<Timeline>) -> Self {
        Self { timeline }
    }
}

impl Replicator for LocalReplicator {
    fn catch_up(&self, from: &Arc<TxRecord>) -> Result<Arc<TxRecord>> {
        let latest = self.timeline.latest();
        if latest.number() > from.number() {
            Ok(latest)
        } else {
            Ok(Arc::clone(from))
        }
    }

    fn catch_up_for_commit(&self, _guard: &SectionGuard<'_>, from: &Arc<TxRecord>) -> Result<Arc<TxRecord>> {
        self.catch_up(from)
    }
}
