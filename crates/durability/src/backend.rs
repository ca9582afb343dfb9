//! Backend trait
//!
//! The engine reaches the shared durable store only through [`Backend`].
//! Every process of a cluster talks to the same backend instance (or to
//! instances sharing the same underlying store).
//!
//! ## Commit-number contract
//!
//! `persist_change_set` must refuse a commit number that is not greater
//! than the store's current maximum. Two processes can therefore never
//! persist the same number, even if their cluster locks misbehave.
//!
//! ## Row locking
//!
//! At commit time the engine queries the log from one below its last known
//! number with [`RowLock::ForUpdate`]. Backends with row locks must lock the
//! returned rows for the rest of the commit; the "minus one" bound
//! guarantees at least one row comes back whenever a row exists at the
//! boundary, so the lock serializes concurrent committers. Backends without
//! row locks rely on the cluster lock held around the whole commit.

use versa_core::{
    ChangeLogRow, ChangeSet, ClassId, ClassRecord, CommitNumber, Oid, Result, ServerId, Value,
};

/// Lock mode for change-log queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// Plain read
    Shared,
    /// Lock returned rows until the commit completes
    ForUpdate,
}

/// Durable store consumed by the engine
pub trait Backend: Send + Sync {
    /// Value of `oid.attribute` as of commit `as_of`
    ///
    /// Attributes of a known object that were never written read as
    /// `Value::Null`. Returns `None` when the store cannot produce the value
    /// (unknown object).
    fn load_attribute(&self, oid: Oid, attribute: &str, as_of: CommitNumber) -> Result<Option<Value>>;

    /// Durably persist one commit
    fn persist_change_set(&self, change_set: &ChangeSet) -> Result<()>;

    /// Change-log rows with commit number greater than `after`, ordered by
    /// commit number
    fn query_change_log_since(&self, after: CommitNumber, lock: RowLock) -> Result<Vec<ChangeLogRow>>;

    /// Highest persisted commit number (`ZERO` for an empty store)
    fn max_commit_number(&self) -> Result<CommitNumber>;

    /// All persisted class records
    fn load_class_records(&self) -> Result<Vec<ClassRecord>>;

    /// Persist a class record; `false` when the id or the name is taken
    fn insert_class_record(&self, record: &ClassRecord) -> Result<bool>;

    /// Allocate the next internal id for a class
    fn next_internal_id(&self, class_id: ClassId) -> Result<u32>;

    /// True when the object was ever created
    fn contains_object(&self, oid: Oid) -> Result<bool>;

    /// Commit that deleted `oid`, if any
    fn deleted_at(&self, oid: Oid) -> Result<Option<CommitNumber>>;

    /// Record the last commit a server has processed
    fn record_server_progress(&self, server: ServerId, number: CommitNumber) -> Result<()>;

    /// Forget a server that left the cluster
    fn remove_server_progress(&self, server: ServerId) -> Result<()>;

    /// Lowest recorded progress across servers
    fn min_server_progress(&self) -> Result<Option<CommitNumber>>;

    /// Delete change-log rows with commit number below `below`
    fn prune_change_log(&self, below: CommitNumber) -> Result<usize>;

    /// Make everything persisted so far durable
    fn flush(&self) -> Result<()>;
}
