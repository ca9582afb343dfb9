//! Database entry point
//!
//! A [`Database`] is one engine process attached to a shared durable store
//! and, optionally, to a cluster of peer processes using the same store.
//!
//! # Example
//!
//! ```ignore
//! use versa_engine::{ClassSchema, Database};
//!
//! let db = Database::builder()
//!     .class(ClassSchema::new("Account").attribute("balance"))
//!     .open()?;
//!
//! let oid = db.with_transaction(false, |db, tx| {
//!     let oid = db.create_object(tx, "Account")?;
//!     db.set_attribute(tx, oid, "balance", 100i64)?;
//!     Ok(oid)
//! })?;
//! ```
//!
//! ## Open sequence
//!
//! ```text
//! 1. allocate a server id              - the first process gets 0
//! 2. wait for the startup barrier      - servers other than 0
//! 3. register classes                  - retried while peers race
//! 4. timeline at the durable maximum
//! 5. critical section, identity map, replication reader, replicator
//! 6. server 0: create the root object, release the startup barrier
//! 7. start the change-log cleaner      - when configured
//! ```

use crate::cleaner::{clean_once, ChangeLogCleaner};
use crate::config::{EngineConfig, ReplicationMode};
use crate::replication::{PollingReplicator, PushReplicator, ReplicationReader};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use versa_cluster::{ClusterCoordinator, LocalCluster};
use versa_concurrency::{
    CommitListener, CriticalSection, ListenerId, MetricsSnapshot, Replicator, Timeline,
    TransactionContext, TransactionManager, TransactionMetrics,
};
use versa_core::{
    ClassId, ClassRecord, CommitNumber, Error, Oid, Result, ServerId, Value, ROOT_OID,
};
use versa_durability::{Backend, MemoryBackend};
use versa_storage::{ClassRegistry, ClassSchema, DomainObject, IdentityMap};

/// One engine process
pub struct Database {
    server_id: ServerId,
    config: EngineConfig,
    backend: Arc<dyn Backend>,
    cluster: Arc<dyn ClusterCoordinator>,
    manager: TransactionManager,
    reader: Arc<ReplicationReader>,
    cleaner: Mutex<Option<ChangeLogCleaner>>,
    closed: AtomicBool,
}

impl Database {
    /// Start configuring a database
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    // === Lifecycle ===

    /// Begin a transaction at the newest snapshot
    pub fn begin(&self, read_only: bool) -> TransactionContext {
        self.manager.begin(read_only)
    }

    /// Commit; `None` for transactions that changed nothing
    pub fn commit(&self, tx: &mut TransactionContext) -> Result<Option<CommitNumber>> {
        self.manager.commit(tx)
    }

    /// Abort without touching durable storage
    pub fn abort(&self, tx: &mut TransactionContext) -> Result<()> {
        self.manager.abort(tx, "aborted by caller")
    }

    /// Detach a transaction from its worker
    pub fn suspend(&self, tx: &mut TransactionContext) -> Result<()> {
        self.manager.suspend(tx)
    }

    /// Reattach a suspended transaction
    pub fn resume(&self, tx: &mut TransactionContext) -> Result<()> {
        self.manager.resume(tx)
    }

    /// Run `f` in a transaction and commit, retrying on conflicts
    ///
    /// `f` runs at most `max_commit_retries` times, each time against a
    /// fresh snapshot. Errors that are not retryable abort the transaction
    /// and are returned immediately; after the last attempt the last
    /// conflict is returned.
    pub fn with_transaction<T, F>(&self, read_only: bool, mut f: F) -> Result<T>
    where
        F: FnMut(&Database, &mut TransactionContext) -> Result<T>,
    {
        let attempts = self.config.max_commit_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self.begin(read_only);
            let outcome = f(self, &mut tx).and_then(|value| self.commit(&mut tx).map(|_| value));
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !tx.is_finished() {
                        if let Err(abort_err) = self.manager.abort(&mut tx, e.to_string()) {
                            debug!(txn_id = tx.txn_id, error = %abort_err, "Abort after failed attempt failed");
                        }
                    }
                    if !e.is_retryable() || attempt >= attempts {
                        return Err(e);
                    }
                    debug!(txn_id = tx.txn_id, attempt, error = %e, "Retrying transaction");
                }
            }
        }
    }

    // === Objects ===

    /// Read `oid.attribute` at the transaction's snapshot
    pub fn get_attribute(&self, tx: &mut TransactionContext, oid: Oid, attribute: &str) -> Result<Value> {
        self.manager.read(tx, oid, attribute)
    }

    /// Buffer a new value for `oid.attribute`
    pub fn set_attribute(
        &self,
        tx: &mut TransactionContext,
        oid: Oid,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.manager.write(tx, oid, attribute, value.into())
    }

    /// Allocate a new object of `class_name`
    pub fn create_object(&self, tx: &mut TransactionContext, class_name: &str) -> Result<Oid> {
        self.manager.create_object(tx, class_name)
    }

    /// Mark `oid` deleted
    pub fn delete_object(&self, tx: &mut TransactionContext, oid: Oid) -> Result<()> {
        self.manager.delete_object(tx, oid)
    }

    /// Canonical instance of `oid` if it exists at the snapshot
    pub fn read_object(&self, tx: &mut TransactionContext, oid: Oid) -> Result<Arc<DomainObject>> {
        self.manager.read_object(tx, oid)
    }

    /// Add the tuple `(relation, left, right)`
    pub fn relate(&self, tx: &mut TransactionContext, relation: &str, left: Oid, right: Oid) -> Result<()> {
        self.manager.relate(tx, relation, left, right)
    }

    /// Remove the tuple `(relation, left, right)`
    pub fn unrelate(&self, tx: &mut TransactionContext, relation: &str, left: Oid, right: Oid) -> Result<()> {
        self.manager.unrelate(tx, relation, left, right)
    }

    /// Objects related to `oid` through `relation`
    pub fn related(&self, tx: &mut TransactionContext, oid: Oid, relation: &str) -> Result<BTreeSet<Oid>> {
        self.manager.related(tx, oid, relation)
    }

    /// Canonical instance for a class id and internal id
    ///
    /// # Errors
    /// `MissingObject` when the store never created the object or has
    /// deleted it.
    pub fn resolve_object(&self, class_id: ClassId, internal_id: u32) -> Result<Arc<DomainObject>> {
        self.manager.object(Oid::new(class_id, internal_id))
    }

    /// Canonical instance for a raw oid
    pub fn object_for_oid(&self, raw: u64) -> Result<Arc<DomainObject>> {
        self.manager.object(Oid::from_raw(raw))
    }

    /// The well-known root object
    pub fn root_object(&self) -> Result<Arc<DomainObject>> {
        self.manager.object(ROOT_OID)
    }

    /// Drop the canonical instance of `oid` from the identity map
    pub fn evict(&self, oid: Oid) -> bool {
        self.manager
            .identity()
            .evict(oid, self.manager.current_commit_number())
    }

    // === Listeners ===

    /// Register a commit listener
    pub fn register_commit_listener(&self, listener: Arc<dyn CommitListener>) -> ListenerId {
        self.manager.register_listener(listener)
    }

    /// Remove a commit listener
    pub fn remove_commit_listener(&self, id: ListenerId) -> bool {
        self.manager.remove_listener(id)
    }

    // === Replication and maintenance ===

    /// Replay commits of other processes now
    pub fn catch_up(&self) -> Result<CommitNumber> {
        self.manager.catch_up()
    }

    /// Newest commit number known to this process
    pub fn current_commit_number(&self) -> CommitNumber {
        self.manager.current_commit_number()
    }

    /// Server id allocated by the cluster
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Transaction counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.manager.metrics()
    }

    /// Replayed foreign commits some running snapshot still predates
    pub fn pending_aliens(&self) -> usize {
        self.reader.pending_aliens()
    }

    /// Record this server's progress and prune rows every server has
    /// processed; returns the number of pruned rows
    pub fn prune_change_log(&self) -> Result<usize> {
        clean_once(self.backend.as_ref(), self.manager.timeline(), self.server_id)
    }

    /// Make everything persisted so far durable
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Stop background work, withdraw this server from the pruning floor
    /// and flush; idempotent
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut cleaner) = self.cleaner.lock().take() {
            cleaner.stop();
        }
        self.backend.remove_server_progress(self.server_id)?;
        self.backend.flush()?;
        info!(
            server_id = %self.server_id,
            commit_number = %self.current_commit_number(),
            "Database shut down"
        );
        Ok(())
    }

    /// True once [`shutdown`](Self::shutdown) ran
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Underlying transaction manager
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Cluster this process belongs to
    pub fn cluster(&self) -> &Arc<dyn ClusterCoordinator> {
        &self.cluster
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(server_id = %self.server_id, error = %e, "Shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("server_id", &self.server_id)
            .field("commit_number", &self.current_commit_number())
            .field("replication", &self.config.replication)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [`Database`]
///
/// Without a backend the database gets a fresh [`MemoryBackend`]; without a
/// cluster it gets a private [`LocalCluster`] and is server 0.
pub struct DatabaseBuilder {
    backend: Option<Arc<dyn Backend>>,
    cluster: Option<Arc<dyn ClusterCoordinator>>,
    schemas: Vec<ClassSchema>,
    config: EngineConfig,
}

impl DatabaseBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            backend: None,
            cluster: None,
            schemas: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Shared durable store
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Cluster shared with peer processes
    pub fn cluster(mut self, cluster: Arc<dyn ClusterCoordinator>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Declare a persistent class
    pub fn class(mut self, schema: ClassSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Declare several persistent classes
    pub fn classes(mut self, schemas: impl IntoIterator<Item = ClassSchema>) -> Self {
        self.schemas.extend(schemas);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Select the replication strategy
    pub fn replication(mut self, mode: ReplicationMode) -> Self {
        self.config.replication = mode;
        self
    }

    /// Bound the attempts of [`Database::with_transaction`]
    pub fn max_commit_retries(mut self, retries: u32) -> Self {
        self.config.max_commit_retries = retries;
        self
    }

    /// Run the change-log cleaner every `secs` seconds
    pub fn cleaner_interval_secs(mut self, secs: u64) -> Self {
        self.config.cleaner_interval_secs = Some(secs);
        self
    }

    /// Open the database
    pub fn open(self) -> Result<Database> {
        self.config.validate()?;
        let config = self.config;
        let backend: Arc<dyn Backend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(MemoryBackend::new()),
        };
        let cluster: Arc<dyn ClusterCoordinator> = match self.cluster {
            Some(cluster) => cluster,
            None => Arc::new(LocalCluster::new()),
        };

        let server_id = cluster.allocate_server_id()?;
        if !server_id.is_first() {
            cluster.wait_for_startup(config.startup_timeout())?;
        }

        let registry = Arc::new(ClassRegistry::new(self.schemas));
        register_classes(backend.as_ref(), &registry, config.class_registration_attempts)?;

        let timeline = Arc::new(Timeline::new(backend.max_commit_number()?));
        backend.record_server_progress(server_id, timeline.latest_number())?;
        let section = Arc::new(CriticalSection::clustered(
            Arc::clone(&cluster),
            config.lock_timeout(),
        ));
        let identity = Arc::new(IdentityMap::new());
        let metrics = Arc::new(TransactionMetrics::new());
        let reader = Arc::new(ReplicationReader::new(
            Arc::clone(&timeline),
            Arc::clone(&section),
            Arc::clone(&identity),
            Arc::clone(&registry),
            Arc::clone(&backend),
            Arc::clone(&metrics),
        ));
        let weak_reader = Arc::downgrade(&reader);
        timeline.add_retire_hook(Arc::new(move |oldest: CommitNumber| {
            if let Some(reader) = weak_reader.upgrade() {
                reader.release_aliens(oldest);
            }
        }));

        let replicator: Arc<dyn Replicator> = match config.replication {
            ReplicationMode::Polling => Arc::new(PollingReplicator::new(Arc::clone(&reader))),
            ReplicationMode::Push => Arc::new(PushReplicator::new(
                Arc::clone(&reader),
                Arc::clone(&cluster),
                server_id,
            )?),
        };

        let manager = TransactionManager::new(
            server_id,
            Arc::clone(&timeline),
            section,
            identity,
            Arc::clone(&registry),
            Arc::clone(&backend),
            replicator,
            metrics,
        )
        .with_limits(config.limits());

        if server_id.is_first() {
            bootstrap_root(&manager)?;
            cluster.notify_startup_complete()?;
        }

        let cleaner = match config.cleaner_interval() {
            Some(interval) => Some(ChangeLogCleaner::start(
                Arc::clone(&backend),
                Arc::clone(&timeline),
                server_id,
                interval,
            )?),
            None => None,
        };

        info!(
            server_id = %server_id,
            commit_number = %timeline.latest_number(),
            classes = registry.records().len(),
            replication = ?config.replication,
            "Database opened"
        );

        Ok(Database {
            server_id,
            config,
            backend,
            cluster,
            manager,
            reader,
            cleaner: Mutex::new(cleaner),
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assign persisted ids to every declared class
///
/// Ids already persisted (by this or a peer process) are installed first.
/// New ids continue after the highest known id; when a peer takes an id or
/// a name between reading and inserting, the round starts over.
fn register_classes(backend: &dyn Backend, registry: &ClassRegistry, attempts: u32) -> Result<()> {
    for attempt in 1..=attempts {
        for record in backend.load_class_records()? {
            registry.install(&record);
        }
        let pending = registry.unregistered();
        if pending.is_empty() {
            return Ok(());
        }

        let mut next = registry.max_class_id().get() + 1;
        let mut clashed = false;
        for name in pending {
            let record = ClassRecord::new(name, ClassId::new(next));
            if !backend.insert_class_record(&record)? {
                debug!(attempt, class_name = %record.class_name, class_id = %record.class_id, "Class id taken; retrying registration");
                clashed = true;
                break;
            }
            registry.install(&record);
            info!(class_name = %record.class_name, class_id = %record.class_id, "Registered class");
            next += 1;
        }
        if !clashed {
            return Ok(());
        }
    }
    Err(Error::Storage(format!(
        "class registration did not settle after {} attempts",
        attempts
    )))
}

/// Create the root object on an empty store
fn bootstrap_root(manager: &TransactionManager) -> Result<()> {
    if manager.backend().contains_object(ROOT_OID)? {
        return Ok(());
    }
    let mut tx = manager.begin(false);
    manager.create_root(&mut tx)?;
    let number = manager.commit(&mut tx)?;
    info!(commit_number = ?number, "Created root object");
    Ok(())
}
