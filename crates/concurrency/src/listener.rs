//! Commit listeners
//!
//! Listeners observe write commits. `before_commit` runs before the
//! critical section is entered and may veto the commit by returning an
//! error; `after_commit` runs once the commit is visible locally.
//! Listeners see the transaction through a read-only [`TxIntrospector`].

use crate::write_set::WriteSet;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use versa_core::{CommitNumber, Oid, RelationTuple, Result, SlotKey, Value};

/// Hook invoked around write commits
pub trait CommitListener: Send + Sync {
    /// Called before validation; an `Err` aborts the transaction
    fn before_commit(&self, _tx: &TxIntrospector<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after the commit is visible
    fn after_commit(&self, _tx: &TxIntrospector<'_>) {}
}

/// Read-only view of a committing transaction
#[derive(Debug, Clone, Copy)]
pub struct TxIntrospector<'a> {
    txn_id: u64,
    snapshot: CommitNumber,
    commit_number: Option<CommitNumber>,
    write_set: &'a WriteSet,
}

impl<'a> TxIntrospector<'a> {
    pub(crate) fn new(
        txn_id: u64,
        snapshot: CommitNumber,
        commit_number: Option<CommitNumber>,
        write_set: &'a WriteSet,
    ) -> Self {
        Self {
            txn_id,
            snapshot,
            commit_number,
            write_set,
        }
    }

    /// Transaction id
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Snapshot the transaction read at
    pub fn snapshot(&self) -> CommitNumber {
        self.snapshot
    }

    /// Assigned commit number; `None` in `before_commit`
    pub fn commit_number(&self) -> Option<CommitNumber> {
        self.commit_number
    }

    /// Objects created by the transaction
    pub fn new_objects(&self) -> Vec<Oid> {
        self.write_set.new_objects().collect()
    }

    /// Pre-existing objects whose attributes changed
    pub fn modified_objects(&self) -> BTreeSet<Oid> {
        self.write_set.modified_objects()
    }

    /// Objects deleted by the transaction
    pub fn deleted_objects(&self) -> Vec<Oid> {
        self.write_set.deleted_objects().collect()
    }

    /// Attribute values written, ordered by slot
    pub fn write_log(&self) -> impl Iterator<Item = (&'a SlotKey, &'a Value)> {
        self.write_set.attributes()
    }

    /// Relation tuple edits
    pub fn relation_changes(&self) -> Vec<RelationTuple> {
        self.write_set.relation_changes()
    }
}

/// Handle for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered commit listeners
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn CommitListener>)>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn register(&self, listener: Arc<dyn CommitListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener; `false` when it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// True when no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn CommitListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Run every `before_commit`, stopping at the first error
    pub fn before_commit(&self, tx: &TxIntrospector<'_>) -> Result<()> {
        for listener in self.snapshot() {
            listener.before_commit(tx)?;
        }
        Ok(())
    }

    /// Run every `after_commit`
    pub fn after_commit(&self, tx: &TxIntrospector<'_>) {
        for listener in self.snapshot() {
            listener.after_commit(tx);
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
