//! Transaction statistics
//!
//! Relaxed atomic counters owned by one engine; [`MetricsSnapshot`] is a
//! point-in-time copy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters
#[derive(Debug, Default)]
pub struct TransactionMetrics {
    begun: AtomicU64,
    read_only_commits: AtomicU64,
    write_commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
    resume_failures: AtomicU64,
    aliens_replayed: AtomicU64,
}

/// Point-in-time copy of [`TransactionMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Transactions begun
    pub begun: u64,
    /// Commits without a commit number (read-only or no changes)
    pub read_only_commits: u64,
    /// Commits that persisted a change set
    pub write_commits: u64,
    /// Aborts of any cause
    pub aborts: u64,
    /// Commit-time validation failures
    pub conflicts: u64,
    /// Resumes rejected as invalid
    pub resume_failures: u64,
    /// Foreign commits replayed into the local timeline
    pub aliens_replayed: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "begun={} read_only_commits={} write_commits={} aborts={} conflicts={} resume_failures={} aliens_replayed={}",
            self.begun,
            self.read_only_commits,
            self.write_commits,
            self.aborts,
            self.conflicts,
            self.resume_failures,
            self.aliens_replayed,
        )
    }
}

impl TransactionMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, wrote: bool) {
        if wrote {
            self.write_commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.read_only_commits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resume_failure(&self) {
        self.resume_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count replayed foreign commits
    pub fn record_aliens(&self, count: u64) {
        self.aliens_replayed.fetch_add(count, Ordering::Relaxed);
    }

    /// Current values
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            begun: self.begun.load(Ordering::Relaxed),
            read_only_commits: self.read_only_commits.load(Ordering::Relaxed),
            write_commits: self.write_commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            resume_failures: self.resume_failures.load(Ordering::Relaxed),
            aliens_replayed: self.aliens_replayed.load(Ordering::Relaxed),
        }
    }
}
