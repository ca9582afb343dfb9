//! Transaction context
//!
//! A [`TransactionContext`] carries the snapshot a transaction reads from
//! (its [`TxRecord`]), its status, and, for write transactions, the read set
//! and the buffered [`WriteSet`].
//!
//! State transitions:
//! - `Active` → `Validating` (begin commit)
//! - `Validating` → `Committed` (validation passed)
//! - `Validating` → `Aborted` (conflict detected)
//! - `Active` → `Aborted` (user abort or error)
//! - `Active` ↔ `Suspended`
//! - `Suspended` → `Aborted` (invalid on resume, or user abort)
//!
//! Terminal states: `Committed`, `Aborted`.

use crate::timeline::TxRecord;
use crate::write_set::WriteSet;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use versa_core::{CommitNumber, Error, Result, SlotKey};
use versa_storage::{VersionBody, VersionedBox};

/// Status of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Executing, can read and write
    Active,
    /// Commit in progress
    Validating,
    /// Committed successfully
    Committed,
    /// Aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
    /// Detached from its worker; must be resumed before further use
    Suspended,
}

/// Read entry: the box and the body observed in it
pub type ReadEntry = (Arc<VersionedBox>, Arc<VersionBody>);

/// Tracking state of a write transaction
#[derive(Debug, Default)]
pub struct WriteState {
    pub(crate) read_set: FxHashMap<SlotKey, ReadEntry>,
    pub(crate) write_set: WriteSet,
}

impl WriteState {
    /// Slots read and the bodies observed
    pub fn read_set(&self) -> &FxHashMap<SlotKey, ReadEntry> {
        &self.read_set
    }

    /// Buffered changes
    pub fn write_set(&self) -> &WriteSet {
        &self.write_set
    }
}

/// Read-only or write transaction
#[derive(Debug)]
pub enum TransactionKind {
    /// Never writes, never conflicts
    ReadOnly,
    /// Tracks reads and buffers writes
    Write(Box<WriteState>),
}

/// One transaction
#[derive(Debug)]
pub struct TransactionContext {
    /// Unique transaction id within the process
    pub txn_id: u64,
    record: Arc<TxRecord>,
    /// Whether this context holds a running count on `record`
    registered: bool,
    /// Whether the first-access catch-up has run
    synced: bool,
    kind: TransactionKind,
    status: TransactionStatus,
    commit_number: Option<CommitNumber>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    reads: u64,
}

impl TransactionContext {
    /// Create a context on a record the caller already registered on
    pub fn new(txn_id: u64, record: Arc<TxRecord>, read_only: bool) -> Self {
        Self {
            txn_id,
            record,
            registered: true,
            synced: false,
            kind: if read_only {
                TransactionKind::ReadOnly
            } else {
                TransactionKind::Write(Box::default())
            },
            status: TransactionStatus::Active,
            commit_number: None,
            start_time: Instant::now(),
            started_at: Utc::now(),
            reads: 0,
        }
    }

    // === Snapshot ===

    /// Commit number this transaction reads at
    pub fn snapshot(&self) -> CommitNumber {
        self.record.number()
    }

    /// Record this transaction is registered on
    pub fn record(&self) -> &Arc<TxRecord> {
        &self.record
    }

    /// Move onto `record`, which the caller has already registered on
    pub(crate) fn move_to(&mut self, record: Arc<TxRecord>) {
        if self.registered {
            self.record.release();
        }
        self.record = record;
        self.registered = true;
    }

    /// Drop the registration on the record
    pub fn release(&mut self) {
        if self.registered {
            self.record.release();
            self.registered = false;
        }
    }

    pub(crate) fn is_synced(&self) -> bool {
        self.synced
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced = true;
    }

    // === Kind ===

    /// True for read-only transactions
    pub fn is_read_only(&self) -> bool {
        matches!(self.kind, TransactionKind::ReadOnly)
    }

    /// Transaction kind
    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    /// Write state, for write transactions
    pub fn write_state(&self) -> Option<&WriteState> {
        match &self.kind {
            TransactionKind::Write(state) => Some(state),
            TransactionKind::ReadOnly => None,
        }
    }

    pub(crate) fn write_state_mut(&mut self) -> Option<&mut WriteState> {
        match &mut self.kind {
            TransactionKind::Write(state) => Some(state),
            TransactionKind::ReadOnly => None,
        }
    }

    /// Buffered changes, for write transactions
    pub fn write_set(&self) -> Option<&WriteSet> {
        self.write_state().map(|state| &state.write_set)
    }

    /// True when commit would persist something
    pub fn has_pending_changes(&self) -> bool {
        self.write_set().map_or(false, |ws| !ws.is_empty())
    }

    pub(crate) fn record_read(&mut self, key: SlotKey, vbox: Arc<VersionedBox>, body: Arc<VersionBody>) {
        if let TransactionKind::Write(state) = &mut self.kind {
            state.read_set.entry(key).or_insert((vbox, body));
        }
    }

    pub(crate) fn count_read(&mut self) {
        self.reads += 1;
    }

    // === State Management ===

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Check if transaction is in Active state
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Check if transaction is committed
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Check if transaction is aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Check if transaction is suspended
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, TransactionStatus::Suspended)
    }

    /// Check if transaction reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.is_committed() || self.is_aborted()
    }

    /// Commit number assigned at commit, if any
    pub fn commit_number(&self) -> Option<CommitNumber> {
        self.commit_number
    }

    /// Check if transaction can accept operations
    ///
    /// # Errors
    /// `InvalidState` if the transaction is not `Active`.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "transaction {} is not active: {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Check if transaction can accept writes
    ///
    /// # Errors
    /// `IllegalWrite` for read-only or finished transactions, `InvalidState`
    /// for suspended or validating ones.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::IllegalWrite(format!(
                "transaction {} is read-only",
                self.txn_id
            )));
        }
        if self.is_finished() {
            return Err(Error::IllegalWrite(format!(
                "transaction {} is finished: {:?}",
                self.txn_id, self.status
            )));
        }
        self.ensure_active()
    }

    /// Transition `Active` → `Validating`
    pub fn mark_validating(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Transition to `Committed`
    ///
    /// Accepted from `Validating` (write commit) and `Active` (commit
    /// without changes).
    pub fn mark_committed(&mut self, number: Option<CommitNumber>) -> Result<()> {
        match self.status {
            TransactionStatus::Active | TransactionStatus::Validating => {
                self.status = TransactionStatus::Committed;
                self.commit_number = number;
                Ok(())
            }
            _ => Err(Error::InvalidState(format!(
                "cannot commit transaction {} from state {:?}",
                self.txn_id, self.status
            ))),
        }
    }

    /// Abort and discard buffered changes
    ///
    /// # Errors
    /// `InvalidState` if already `Committed` or `Aborted`.
    pub fn mark_aborted(&mut self, reason: impl Into<String>) -> Result<()> {
        match &self.status {
            TransactionStatus::Committed => Err(Error::InvalidState(format!(
                "cannot abort committed transaction {}",
                self.txn_id
            ))),
            TransactionStatus::Aborted { .. } => Err(Error::InvalidState(format!(
                "transaction {} already aborted",
                self.txn_id
            ))),
            _ => {
                self.status = TransactionStatus::Aborted {
                    reason: reason.into(),
                };
                if let TransactionKind::Write(state) = &mut self.kind {
                    state.write_set.clear();
                }
                Ok(())
            }
        }
    }

    /// Transition `Active` → `Suspended`
    pub fn mark_suspended(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Suspended;
        Ok(())
    }

    /// Transition `Suspended` → `Active`
    pub fn mark_resumed(&mut self) -> Result<()> {
        if !self.is_suspended() {
            return Err(Error::InvalidState(format!(
                "transaction {} is not suspended: {:?}",
                self.txn_id, self.status
            )));
        }
        self.status = TransactionStatus::Active;
        Ok(())
    }

    // === Introspection ===

    /// Wall-clock start time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the transaction began
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of attribute reads performed
    pub fn read_count(&self) -> u64 {
        self.reads
    }

    /// Number of buffered attribute values
    pub fn write_count(&self) -> usize {
        self.write_set().map_or(0, |ws| ws.attribute_count())
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.release();
    }
}
