//! Timeline of commit records
//!
//! The timeline is a singly linked chain of [`TxRecord`]s, one per commit
//! number the process has observed, strictly increasing. Each record counts
//! the transactions currently reading from its snapshot.
//!
//! ```text
//! oldest ──► [12 | running 0] ──► [13 | running 2] ──► [15 | running 1] ◄── latest
//! ```
//!
//! - Only the holder of the critical section appends (see [`Timeline::advance`]).
//! - A record is retired once nobody runs on it and a successor exists;
//!   retiring trims the version chains of the boxes the successor wrote,
//!   since no remaining snapshot can see the older bodies.

use crate::section::SectionGuard;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use versa_core::{CommitNumber, Error, Result};
use versa_storage::VersionedBox;

/// Called with the new oldest commit number after records are retired
pub type RetireHook = Arc<dyn Fn(CommitNumber) + Send + Sync>;

/// One commit number of the timeline
pub struct TxRecord {
    number: CommitNumber,
    running: AtomicUsize,
    next: OnceCell<Arc<TxRecord>>,
    /// Boxes that received a body at `number`
    written: Mutex<Vec<Arc<VersionedBox>>>,
}

impl TxRecord {
    fn new(number: CommitNumber, written: Vec<Arc<VersionedBox>>) -> Self {
        Self {
            number,
            running: AtomicUsize::new(0),
            next: OnceCell::new(),
            written: Mutex::new(written),
        }
    }

    /// Commit number of this record
    pub fn number(&self) -> CommitNumber {
        self.number
    }

    /// Transactions currently registered on this record
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Successor, if one has been appended
    pub fn next(&self) -> Option<&Arc<TxRecord>> {
        self.next.get()
    }

    /// Register one more transaction on this record
    pub(crate) fn register(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one registration
    pub(crate) fn release(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for TxRecord {
    // Unlink iteratively so dropping a long chain cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(record) = next {
            match Arc::try_unwrap(record) {
                Ok(mut record) => next = record.next.take(),
                Err(_) => break,
            }
        }
    }
}

impl std::fmt::Debug for TxRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxRecord")
            .field("number", &self.number)
            .field("running", &self.running())
            .field("has_next", &self.next.get().is_some())
            .finish()
    }
}

/// Process-wide chain of commit records
pub struct Timeline {
    latest: RwLock<Arc<TxRecord>>,
    oldest: Mutex<Arc<TxRecord>>,
    hooks: RwLock<Vec<RetireHook>>,
}

impl Timeline {
    /// Start a timeline at `number` (the durable maximum at startup)
    pub fn new(number: CommitNumber) -> Self {
        let first = Arc::new(TxRecord::new(number, Vec::new()));
        Self {
            latest: RwLock::new(Arc::clone(&first)),
            oldest: Mutex::new(first),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Most recent record
    pub fn latest(&self) -> Arc<TxRecord> {
        Arc::clone(&self.latest.read())
    }

    /// Commit number of the most recent record
    pub fn latest_number(&self) -> CommitNumber {
        self.latest.read().number
    }

    /// Commit number of the oldest retained record
    pub fn oldest_number(&self) -> CommitNumber {
        self.oldest.lock().number
    }

    /// Register a hook run after records are retired
    pub fn add_retire_hook(&self, hook: RetireHook) {
        self.hooks.write().push(hook);
    }

    /// Register a new transaction on the most recent record
    ///
    /// If a newer record is appended between reading the tail and
    /// registering, the registration is undone and retried on the newer
    /// record, so a transaction never lands on a record that garbage
    /// collection may already be retiring.
    pub fn snapshot_for_new_transaction(&self) -> Arc<TxRecord> {
        loop {
            let record = self.latest();
            record.register();
            if record.next.get().is_none() {
                return record;
            }
            record.release();
        }
    }

    /// Append the record for `number`
    ///
    /// `boxes` are the boxes that received a body at `number`.
    ///
    /// # Errors
    ///
    /// `Internal` if `number` is not greater than the current tail.
    pub fn advance(
        &self,
        _guard: &SectionGuard<'_>,
        number: CommitNumber,
        boxes: Vec<Arc<VersionedBox>>,
    ) -> Result<Arc<TxRecord>> {
        let mut latest = self.latest.write();
        if number <= latest.number {
            return Err(Error::Internal(format!(
                "timeline cannot advance from {} to {}",
                latest.number, number
            )));
        }
        let record = Arc::new(TxRecord::new(number, boxes));
        latest
            .next
            .set(Arc::clone(&record))
            .map_err(|_| Error::Internal(format!("record {} already has a successor", latest.number)))?;
        *latest = Arc::clone(&record);
        Ok(record)
    }

    /// First record at or after `number`, walking forward from `from`
    ///
    /// Never returns a record older than `number`; `None` when the chain
    /// has not reached `number` yet.
    pub fn find_at_or_after(&self, from: &Arc<TxRecord>, number: CommitNumber) -> Option<Arc<TxRecord>> {
        let mut current = Arc::clone(from);
        loop {
            if current.number >= number {
                return Some(current);
            }
            let next = Arc::clone(current.next.get()?);
            current = next;
        }
    }

    /// Register one transaction on `record` unless it was already retired
    ///
    /// Garbage collection holds the oldest-record lock for its whole pass,
    /// so after registering, a record not older than the oldest retained
    /// one is pinned. On `false` the caller must retry with a newer record.
    pub fn try_register(&self, record: &TxRecord) -> bool {
        record.register();
        if self.oldest_number() <= record.number {
            true
        } else {
            record.release();
            false
        }
    }

    /// Retire unreferenced records
    ///
    /// Returns the number of records retired. Concurrent callers skip the
    /// pass rather than wait.
    pub fn collect_garbage(&self) -> usize {
        let Some(mut oldest) = self.oldest.try_lock() else {
            return 0;
        };
        let mut retired = 0;
        while oldest.running() == 0 {
            let Some(next) = oldest.next.get().cloned() else {
                break;
            };
            let written = std::mem::take(&mut *next.written.lock());
            for vbox in &written {
                vbox.trim_below(next.number);
            }
            *oldest = next;
            retired += 1;
        }
        let new_oldest = oldest.number;
        drop(oldest);

        if retired > 0 {
            debug!(retired, commit_number = %new_oldest, "Retired timeline records");
            let hooks: Vec<RetireHook> = self.hooks.read().iter().cloned().collect();
            for hook in hooks {
                hook(new_oldest);
            }
        }
        retired
    }

    /// Records between oldest and latest, inclusive
    pub fn len(&self) -> usize {
        let mut count = 1;
        let mut current = Arc::clone(&self.oldest.lock());
        while let Some(next) = current.next.get().cloned() {
            current = next;
            count += 1;
        }
        count
    }

    /// Always false; the timeline keeps at least one record
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("oldest", &self.oldest_number())
            .field("latest", &self.latest_number())
            .finish()
    }
}
