//! Transaction manager
//!
//! Drives the transaction lifecycle: begin, read, write, commit, abort,
//! suspend and resume.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. before_commit listeners        - an Err aborts the transaction
//! 2. enter the critical section     - local mutex, then cluster lock
//! 3. catch_up_for_commit            - replay foreign commits, row-locking query
//! 4. validate the read set at tail  - only if the tail moved past the snapshot
//! 5. persist the ChangeSet at tail+1  (DURABILITY POINT)
//! 6. append bodies, advance timeline
//! 7. announce to peers, leave the critical section
//! 8. mark Committed, after_commit listeners
//! ```
//!
//! A failure before step 5 aborts the transaction and leaves no durable
//! trace. A failure after step 5 is logged and the commit still succeeds:
//! the change set is durable, and any process (this one included, on its
//! next catch-up) replays it from the change log.

use crate::listener::{CommitListener, ListenerId, ListenerRegistry, TxIntrospector};
use crate::metrics::{MetricsSnapshot, TransactionMetrics};
use crate::replicator::Replicator;
use crate::section::CriticalSection;
use crate::timeline::{Timeline, TxRecord};
use crate::transaction::TransactionContext;
use crate::validation::validate_read_set;
use crate::write_set::WriteSet;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use versa_core::{
    CommitNumber, Error, Oid, RelationChange, Result, ServerId, SlotKey, Value, DELETED_ATTRIBUTE,
    ROOT_CLASS_ID, ROOT_OID,
};
use versa_durability::Backend;
use versa_storage::{ClassRegistry, DomainObject, IdentityMap};

/// Size thresholds above which a commit logs a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionLimits {
    /// Attribute reads
    pub read_warn: u64,
    /// Buffered attribute values
    pub write_warn: usize,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            read_warn: 10_000_000,
            write_warn: 100_000,
        }
    }
}

impl TransactionLimits {
    /// True when either count is above its threshold
    pub fn exceeded_by(&self, reads: u64, writes: usize) -> bool {
        reads > self.read_warn || writes > self.write_warn
    }
}

/// Manages transaction lifecycle and commits
///
/// # Thread Safety
///
/// Every method takes `&self`; one manager serves all worker threads.
/// Only replay and steps 2-7 of a commit run inside the critical section.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    server_id: ServerId,
    timeline: Arc<Timeline>,
    section: Arc<CriticalSection>,
    identity: Arc<IdentityMap>,
    registry: Arc<ClassRegistry>,
    backend: Arc<dyn Backend>,
    replicator: Arc<dyn Replicator>,
    listeners: ListenerRegistry,
    metrics: Arc<TransactionMetrics>,
    limits: TransactionLimits,
}

impl TransactionManager {
    /// Create a manager over shared engine components
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_id: ServerId,
        timeline: Arc<Timeline>,
        section: Arc<CriticalSection>,
        identity: Arc<IdentityMap>,
        registry: Arc<ClassRegistry>,
        backend: Arc<dyn Backend>,
        replicator: Arc<dyn Replicator>,
        metrics: Arc<TransactionMetrics>,
    ) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            server_id,
            timeline,
            section,
            identity,
            registry,
            backend,
            replicator,
            listeners: ListenerRegistry::new(),
            metrics,
            limits: TransactionLimits::default(),
        }
    }

    /// Replace the large-transaction thresholds
    pub fn with_limits(mut self, limits: TransactionLimits) -> Self {
        self.limits = limits;
        self
    }

    // === Accessors ===

    /// Server id of this process
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Process timeline
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Identity map
    pub fn identity(&self) -> &Arc<IdentityMap> {
        &self.identity
    }

    /// Class registry
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Durable store
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Most recent commit number known to this process
    pub fn current_commit_number(&self) -> CommitNumber {
        self.timeline.latest_number()
    }

    /// Counter snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register a commit listener
    pub fn register_listener(&self, listener: Arc<dyn CommitListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    /// Remove a commit listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Replay foreign commits now; returns the new tail number
    pub fn catch_up(&self) -> Result<CommitNumber> {
        let latest = self.timeline.latest();
        let record = self.replicator.catch_up(&latest)?;
        Ok(record.number())
    }

    // === Lifecycle ===

    /// Begin a transaction at the most recent snapshot
    pub fn begin(&self, read_only: bool) -> TransactionContext {
        let record = self.timeline.snapshot_for_new_transaction();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_begin();
        debug!(txn_id, read_only, commit_number = %record.number(), "Transaction begun");
        TransactionContext::new(txn_id, record, read_only)
    }

    /// Catch the transaction up with the durable log on its first access
    fn ensure_synced(&self, tx: &mut TransactionContext) -> Result<()> {
        if tx.is_synced() {
            return Ok(());
        }
        let record = self.pin_caught_up(tx)?;
        if !Arc::ptr_eq(&record, tx.record()) {
            tx.move_to(record);
        }
        tx.mark_synced();
        Ok(())
    }

    /// Catch up and register on the resulting record
    ///
    /// Any record other than the transaction's own comes back registered.
    fn pin_caught_up(&self, tx: &TransactionContext) -> Result<Arc<TxRecord>> {
        loop {
            let record = self.replicator.catch_up(tx.record())?;
            if Arc::ptr_eq(&record, tx.record()) {
                return Ok(record);
            }
            if self.timeline.try_register(&record) {
                return Ok(record);
            }
        }
    }

    fn access(&self, tx: &mut TransactionContext) -> Result<()> {
        tx.ensure_active()?;
        self.ensure_synced(tx)
    }

    fn access_for_write(&self, tx: &mut TransactionContext) -> Result<()> {
        tx.ensure_writable()?;
        self.ensure_synced(tx)
    }

    /// Canonical instance of a persisted, undeleted object
    ///
    /// # Errors
    /// `UnknownClass` when the class id has no local schema, `MissingObject`
    /// when the store never created the object or has deleted it.
    pub fn object(&self, oid: Oid) -> Result<Arc<DomainObject>> {
        if self.backend.deleted_at(oid)?.is_some() {
            return Err(Error::MissingObject(oid));
        }
        self.materialize(oid)
    }

    /// Canonical instance of an object the store created
    ///
    /// Only committed objects enter the identity map, so a hit there proves
    /// existence.
    fn materialize(&self, oid: Oid) -> Result<Arc<DomainObject>> {
        if oid.is_padding() {
            return Err(Error::MissingObject(oid));
        }
        let entry = self.registry.by_id(oid.class_id())?;
        if let Some(object) = self.identity.get(oid) {
            return Ok(object);
        }
        if !self.backend.contains_object(oid)? {
            return Err(Error::MissingObject(oid));
        }
        Ok(self
            .identity
            .get_or_allocate(oid, |oid, base| entry.instantiate(oid, base)))
    }

    // === Reads ===

    /// Read `oid.attribute` at the transaction's snapshot
    ///
    /// Own buffered writes win; attributes of objects created by this
    /// transaction and never written read as `Null`.
    ///
    /// # Errors
    /// `VersionUnavailable` aborts the transaction.
    pub fn read(&self, tx: &mut TransactionContext, oid: Oid, attribute: &str) -> Result<Value> {
        self.access(tx)?;
        tx.count_read();

        let key = SlotKey::new(oid, attribute);
        if let Some(ws) = tx.write_set() {
            if let Some(value) = ws.get(&key) {
                return Ok(value.clone());
            }
            if ws.is_new(oid) {
                return Ok(Value::Null);
            }
        }

        let object = self.materialize(oid)?;
        let vbox = object.slot(attribute);
        let snapshot = tx.snapshot();
        let unavailable = || Error::VersionUnavailable {
            oid,
            attribute: attribute.to_string(),
            snapshot,
        };

        let Some(body) = vbox.body_at(snapshot) else {
            let e = unavailable();
            self.abort_after_error(tx, &e);
            return Err(e);
        };
        let loaded = body
            .get_or_load(|| {
                self.backend
                    .load_attribute(oid, attribute, snapshot)?
                    .ok_or_else(unavailable)
            })
            .map(Value::clone);
        let value = match loaded {
            Ok(value) => value,
            Err(e) => {
                if matches!(e, Error::VersionUnavailable { .. }) {
                    self.abort_after_error(tx, &e);
                }
                return Err(e);
            }
        };
        tx.record_read(key, vbox, body);
        Ok(value)
    }

    /// Objects related to `oid` through `relation`
    pub fn related(&self, tx: &mut TransactionContext, oid: Oid, relation: &str) -> Result<BTreeSet<Oid>> {
        match self.read(tx, oid, relation)? {
            Value::Null => Ok(BTreeSet::new()),
            Value::RefSet(set) => Ok(set),
            other => Err(Error::InvalidState(format!(
                "{}.{} holds {}, not a relation",
                oid,
                relation,
                other.type_name()
            ))),
        }
    }

    /// Canonical instance of `oid` if it exists at the snapshot
    ///
    /// # Errors
    /// `MissingObject` for objects deleted as of the snapshot;
    /// `InvalidState` for objects this transaction created, which have no
    /// canonical instance until commit.
    pub fn read_object(&self, tx: &mut TransactionContext, oid: Oid) -> Result<Arc<DomainObject>> {
        self.access(tx)?;
        self.ensure_live(tx, oid)?;
        if Self::is_new(tx, oid) {
            return Err(Error::InvalidState(format!("{} is not committed yet", oid)));
        }
        self.materialize(oid)
    }

    /// `MissingObject` unless `oid` exists and is undeleted at the snapshot
    ///
    /// The deletion marker joins the read set, so a concurrent delete
    /// invalidates the transaction.
    fn ensure_live(&self, tx: &mut TransactionContext, oid: Oid) -> Result<()> {
        let deleted = self.read(tx, oid, DELETED_ATTRIBUTE)?;
        if deleted.as_bool() == Some(true) {
            return Err(Error::MissingObject(oid));
        }
        Ok(())
    }

    // === Writes ===

    fn write_set_mut<'t>(&self, tx: &'t mut TransactionContext) -> Result<&'t mut WriteSet> {
        let txn_id = tx.txn_id;
        tx.write_state_mut()
            .map(|state| &mut state.write_set)
            .ok_or_else(|| Error::IllegalWrite(format!("transaction {} is read-only", txn_id)))
    }

    fn is_new(tx: &TransactionContext, oid: Oid) -> bool {
        tx.write_set().map_or(false, |ws| ws.is_new(oid))
    }

    /// Buffer a new value for `oid.attribute`
    ///
    /// # Errors
    /// `IllegalWrite` for read-only or finished transactions and for the
    /// reserved deletion marker.
    pub fn write(&self, tx: &mut TransactionContext, oid: Oid, attribute: &str, value: Value) -> Result<()> {
        self.access_for_write(tx)?;
        if attribute == DELETED_ATTRIBUTE {
            return Err(Error::IllegalWrite(format!(
                "{} is reserved; use delete_object",
                DELETED_ATTRIBUTE
            )));
        }
        self.ensure_live(tx, oid)?;
        self.write_set_mut(tx)?
            .set_attribute(SlotKey::new(oid, attribute), value);
        Ok(())
    }

    /// Allocate a new object of `class_name`
    pub fn create_object(&self, tx: &mut TransactionContext, class_name: &str) -> Result<Oid> {
        self.access_for_write(tx)?;
        let entry = self.registry.by_name(class_name)?;
        if entry.id() == ROOT_CLASS_ID {
            return Err(Error::IllegalWrite(
                "the root object is created once at bootstrap".into(),
            ));
        }
        let internal = self.backend.next_internal_id(entry.id())?;
        let oid = Oid::new(entry.id(), internal);
        self.write_set_mut(tx)?.add_new_object(oid);
        debug!(txn_id = tx.txn_id, oid = %oid, class = class_name, "Object created");
        Ok(oid)
    }

    /// Create the well-known root object
    ///
    /// # Errors
    /// `InvalidState` when the store already holds it.
    pub fn create_root(&self, tx: &mut TransactionContext) -> Result<Oid> {
        self.access_for_write(tx)?;
        if self.backend.contains_object(ROOT_OID)? {
            return Err(Error::InvalidState("root object already exists".into()));
        }
        self.registry.by_id(ROOT_CLASS_ID)?;
        self.write_set_mut(tx)?.add_new_object(ROOT_OID);
        Ok(ROOT_OID)
    }

    /// Mark `oid` deleted
    pub fn delete_object(&self, tx: &mut TransactionContext, oid: Oid) -> Result<()> {
        self.access_for_write(tx)?;
        if oid == ROOT_OID {
            return Err(Error::IllegalWrite("the root object cannot be deleted".into()));
        }
        self.ensure_live(tx, oid)?;
        let ws = self.write_set_mut(tx)?;
        ws.set_attribute(SlotKey::new(oid, DELETED_ATTRIBUTE), Value::Bool(true));
        ws.delete_object(oid);
        Ok(())
    }

    /// Add the tuple `(relation, left, right)`
    pub fn relate(&self, tx: &mut TransactionContext, relation: &str, left: Oid, right: Oid) -> Result<()> {
        self.edit_relation(tx, relation, left, right, RelationChange::Add)
    }

    /// Remove the tuple `(relation, left, right)`
    pub fn unrelate(&self, tx: &mut TransactionContext, relation: &str, left: Oid, right: Oid) -> Result<()> {
        self.edit_relation(tx, relation, left, right, RelationChange::Remove)
    }

    /// Both ends carry a reference set named after the relation
    fn edit_relation(
        &self,
        tx: &mut TransactionContext,
        relation: &str,
        left: Oid,
        right: Oid,
        change: RelationChange,
    ) -> Result<()> {
        self.access_for_write(tx)?;
        self.ensure_live(tx, left)?;
        self.ensure_live(tx, right)?;
        for (this, other) in [(left, right), (right, left)] {
            let mut set = self.related(tx, this, relation)?;
            match change {
                RelationChange::Add => set.insert(other),
                RelationChange::Remove => set.remove(&other),
            };
            self.write_set_mut(tx)?
                .set_attribute(SlotKey::new(this, relation), Value::RefSet(set));
        }
        self.write_set_mut(tx)?.relate(relation, left, right, change);
        Ok(())
    }

    // === Commit ===

    /// Commit a transaction
    ///
    /// Returns the assigned commit number, or `None` for read-only
    /// transactions and write transactions without changes.
    ///
    /// # Errors
    /// `CommitConflict` when a read was invalidated; the transaction is
    /// aborted and the caller may retry from a fresh `begin`.
    pub fn commit(&self, tx: &mut TransactionContext) -> Result<Option<CommitNumber>> {
        tx.ensure_active()?;

        if !tx.has_pending_changes() {
            tx.mark_committed(None)?;
            tx.release();
            self.metrics.record_commit(false);
            self.timeline.collect_garbage();
            return Ok(None);
        }

        self.warn_if_large(tx);

        let vetoed = match tx.write_set() {
            Some(ws) => self
                .listeners
                .before_commit(&TxIntrospector::new(tx.txn_id, tx.snapshot(), None, ws))
                .err(),
            None => None,
        };
        if let Some(e) = vetoed {
            self.abort_after_error(tx, &e);
            return Err(e);
        }

        tx.mark_validating()?;
        let number = match self.persist_and_advance(tx) {
            Ok(number) => number,
            Err(e) => {
                self.abort_after_error(tx, &e);
                return Err(e);
            }
        };

        tx.mark_committed(Some(number))?;
        tx.release();
        self.metrics.record_commit(true);
        self.timeline.collect_garbage();

        if let Some(ws) = tx.write_set() {
            self.listeners
                .after_commit(&TxIntrospector::new(tx.txn_id, tx.snapshot(), Some(number), ws));
        }
        debug!(txn_id = tx.txn_id, commit_number = %number, "Transaction committed");
        Ok(Some(number))
    }

    /// Steps 2-7 of the commit sequence
    fn persist_and_advance(&self, tx: &TransactionContext) -> Result<CommitNumber> {
        let state = tx
            .write_state()
            .ok_or_else(|| Error::Internal("write commit without write state".into()))?;
        let snapshot = tx.snapshot();

        let guard = self.section.enter()?;
        let tail = self.replicator.catch_up_for_commit(&guard, tx.record())?;

        if tail.number() != snapshot {
            let result = validate_read_set(&state.read_set, tail.number());
            if !result.is_valid() {
                self.metrics.record_conflict();
                debug!(
                    txn_id = tx.txn_id,
                    snapshot = %snapshot,
                    latest = %tail.number(),
                    conflicts = result.conflict_count(),
                    "Read set invalidated"
                );
                return Err(Error::CommitConflict {
                    snapshot,
                    latest: tail.number(),
                    conflicts: result.conflict_count(),
                });
            }
        }

        let number = tail
            .number()
            .next()
            .ok_or_else(|| Error::Internal("commit numbers exhausted".into()))?;
        let change_set = state.write_set.to_change_set(self.server_id, number);
        self.backend.persist_change_set(&change_set)?;

        // DURABILITY POINT: failures below are logged, not returned.

        let mut boxes = Vec::with_capacity(change_set.attributes.len());
        for write in &change_set.attributes {
            let object = self
                .identity
                .get_or_allocate(write.oid, |oid, base| self.registry.instantiate(oid, base));
            let vbox = object.slot(write.attribute.as_str());
            if vbox.append_version(number, Some(write.value.clone())).is_some() {
                boxes.push(vbox);
            } else {
                error!(
                    commit_number = %number,
                    slot = %vbox.key(),
                    "Version chain already ahead of local commit"
                );
            }
        }
        if let Err(e) = self.timeline.advance(&guard, number, boxes) {
            error!(
                txn_id = tx.txn_id,
                commit_number = %number,
                error = %e,
                "Timeline advance failed after persist - will be replayed from the change log"
            );
        }
        if let Err(e) = self.replicator.announce(&guard, number, &change_set.rows) {
            warn!(commit_number = %number, error = %e, "Commit announcement failed; peers will poll");
        }
        drop(guard);
        Ok(number)
    }

    fn warn_if_large(&self, tx: &TransactionContext) {
        let reads = tx.read_count();
        let writes = tx.write_count();
        if self.limits.exceeded_by(reads, writes) {
            warn!(
                txn_id = tx.txn_id,
                reads,
                writes,
                elapsed_ms = tx.elapsed().as_millis() as u64,
                "Large transaction"
            );
        }
    }

    // === Abort, suspend, resume ===

    /// Abort a transaction; never touches durable storage
    pub fn abort(&self, tx: &mut TransactionContext, reason: impl Into<String>) -> Result<()> {
        tx.mark_aborted(reason)?;
        tx.release();
        self.metrics.record_abort();
        self.timeline.collect_garbage();
        Ok(())
    }

    fn abort_after_error(&self, tx: &mut TransactionContext, cause: &Error) {
        if !tx.is_finished() {
            if let Err(e) = self.abort(tx, cause.to_string()) {
                debug!(txn_id = tx.txn_id, cause = %cause, error = %e, "Abort after error failed");
            }
        }
    }

    /// Detach a transaction from its worker
    ///
    /// The transaction keeps its snapshot registered while suspended.
    pub fn suspend(&self, tx: &mut TransactionContext) -> Result<()> {
        tx.mark_suspended()
    }

    /// Reattach a suspended transaction
    ///
    /// Write transactions are re-validated against the caught-up timeline
    /// and move onto it. Read-only transactions keep their snapshot.
    ///
    /// # Errors
    /// `ResumeInvalid` when a read was invalidated; the transaction is
    /// aborted.
    pub fn resume(&self, tx: &mut TransactionContext) -> Result<()> {
        tx.mark_resumed()?;
        if tx.is_read_only() {
            return Ok(());
        }

        let latest = match self.pin_caught_up(tx) {
            Ok(latest) => latest,
            Err(e) => {
                self.abort_after_error(tx, &e);
                return Err(e);
            }
        };
        let snapshot = tx.snapshot();
        if !Arc::ptr_eq(&latest, tx.record()) {
            let valid = tx
                .write_state()
                .map_or(true, |state| validate_read_set(&state.read_set, latest.number()).is_valid());
            if !valid {
                latest.release();
                self.metrics.record_resume_failure();
                let e = Error::ResumeInvalid {
                    snapshot,
                    latest: latest.number(),
                };
                self.abort_after_error(tx, &e);
                return Err(e);
            }
            tx.move_to(latest);
        }
        tx.mark_synced();
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("server_id", &self.server_id)
            .field("timeline", &self.timeline)
            .field("listeners", &self.listeners)
            .field("limits", &self.limits)
            .finish()
    }
}
