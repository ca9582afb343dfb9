//! Replication
//!
//! Commits made by other processes reach this process as change-log rows,
//! either queried from the durable log or carried by a cluster broadcast.
//! The [`ReplicationReader`] turns them into alien transactions: for every
//! commit number it appends a not-loaded body to each changed box and
//! advances the timeline. Values are hydrated lazily by the first reader.
//!
//! Two [`Replicator`] strategies drive the reader:
//! - [`PollingReplicator`]: every catch-up consults the durable log.
//! - [`PushReplicator`]: catch-up applies queued broadcasts and falls back
//!   to the log only to bridge a gap, or at commit time when the store is
//!   ahead of the timeline (a peer that persisted but never broadcast).

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use versa_cluster::{ClusterCoordinator, SubscriptionId};
use versa_concurrency::{
    CriticalSection, Replicator, SectionGuard, Timeline, TransactionMetrics, TxRecord,
};
use versa_core::{
    ChangeLogRow, ClassId, CommitMessage, CommitNumber, Error, Oid, Result, ServerId,
};
use versa_durability::{Backend, RowLock};
use versa_storage::{ClassRegistry, IdentityMap};

fn stall(context: &str, e: Error) -> Error {
    match e {
        Error::ReplicationStall(_) => e,
        other => Error::ReplicationStall(format!("{}: {}", context, other)),
    }
}

/// Change-log rows of one foreign commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlienTransaction {
    number: CommitNumber,
    /// Changed attributes per object; empty for padding-only commits
    changes: BTreeMap<Oid, BTreeSet<String>>,
}

impl AlienTransaction {
    /// Group ordered rows into one alien transaction per commit number
    ///
    /// Padding rows produce a transaction without changes.
    pub fn group(rows: Vec<ChangeLogRow>) -> Vec<AlienTransaction> {
        let mut groups: Vec<AlienTransaction> = Vec::new();
        for row in rows {
            let start_new = groups
                .last()
                .map_or(true, |last| last.number != row.commit_number);
            if start_new {
                groups.push(AlienTransaction {
                    number: row.commit_number,
                    changes: BTreeMap::new(),
                });
            }
            if row.is_padding() {
                continue;
            }
            if let Some(group) = groups.last_mut() {
                group
                    .changes
                    .entry(row.object_id)
                    .or_default()
                    .insert(row.attribute);
            }
        }
        groups
    }

    /// Commit number
    pub fn number(&self) -> CommitNumber {
        self.number
    }

    /// Changed objects and their attributes
    pub fn changes(&self) -> &BTreeMap<Oid, BTreeSet<String>> {
        &self.changes
    }

    /// Number of changed slots
    pub fn slot_count(&self) -> usize {
        self.changes.values().map(BTreeSet::len).sum()
    }
}

/// Replays foreign commits into the local timeline
pub struct ReplicationReader {
    timeline: Arc<Timeline>,
    section: Arc<CriticalSection>,
    identity: Arc<IdentityMap>,
    registry: Arc<ClassRegistry>,
    backend: Arc<dyn Backend>,
    metrics: Arc<TransactionMetrics>,
    /// Replayed commits not yet passed by the oldest running record
    pending: Mutex<VecDeque<AlienTransaction>>,
}

impl ReplicationReader {
    /// Create a reader over shared engine components
    pub fn new(
        timeline: Arc<Timeline>,
        section: Arc<CriticalSection>,
        identity: Arc<IdentityMap>,
        registry: Arc<ClassRegistry>,
        backend: Arc<dyn Backend>,
        metrics: Arc<TransactionMetrics>,
    ) -> Self {
        Self {
            timeline,
            section,
            identity,
            registry,
            backend,
            metrics,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Timeline the reader advances
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Critical section guarding replay
    pub fn section(&self) -> &Arc<CriticalSection> {
        &self.section
    }

    /// Durable store
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Replay ordered change-log rows
    ///
    /// Commits at or below the timeline tail are skipped, so replaying the
    /// same rows twice is a no-op. Returns the number of commits applied.
    pub fn replay_rows(&self, guard: &SectionGuard<'_>, rows: Vec<ChangeLogRow>) -> Result<usize> {
        let mut applied = 0;
        for alien in AlienTransaction::group(rows) {
            if alien.number <= self.timeline.latest_number() {
                continue;
            }
            let mut boxes = Vec::with_capacity(alien.slot_count());
            for (oid, attributes) in &alien.changes {
                self.ensure_class(oid.class_id())?;
                let object = self
                    .identity
                    .get_or_allocate(*oid, |oid, base| self.registry.instantiate(oid, base));
                for attribute in attributes {
                    let vbox = object.slot(attribute.as_str());
                    if vbox.append_version(alien.number, None).is_some() {
                        boxes.push(vbox);
                    }
                }
            }
            self.timeline.advance(guard, alien.number, boxes)?;
            debug!(
                commit_number = %alien.number,
                objects = alien.changes.len(),
                "Replayed foreign commit"
            );
            self.pending.lock().push_back(alien);
            applied += 1;
        }
        if applied > 0 {
            self.metrics.record_aliens(applied as u64);
        }
        Ok(applied)
    }

    /// Install class records registered by peers after this process started
    fn ensure_class(&self, class_id: ClassId) -> Result<()> {
        if self.registry.is_known(class_id) {
            return Ok(());
        }
        for record in self.backend.load_class_records()? {
            let installed = self.registry.install(&record);
            if record.class_id == class_id && installed.is_some() {
                info!(class_id = %record.class_id, class_name = %record.class_name, "Installed class registered by a peer");
            }
        }
        Ok(())
    }

    /// Replay everything newer than the timeline tail
    ///
    /// # Errors
    /// Backend failures surface as `ReplicationStall`.
    pub fn poll(&self, guard: &SectionGuard<'_>) -> Result<usize> {
        let tail = self.timeline.latest_number();
        let rows = self
            .backend
            .query_change_log_since(tail, RowLock::Shared)
            .map_err(|e| stall("change log query failed", e))?;
        self.replay_rows(guard, rows)
    }

    /// Commit-time variant of [`poll`](Self::poll)
    ///
    /// Queries from one below the tail with row locking, so a row-locking
    /// backend returns (and locks) at least the tail's own rows.
    pub fn poll_for_commit(&self, guard: &SectionGuard<'_>) -> Result<usize> {
        let tail = self.timeline.latest_number();
        let rows = self
            .backend
            .query_change_log_since(tail.prev(), RowLock::ForUpdate)
            .map_err(|e| stall("change log query failed", e))?;
        self.replay_rows(guard, rows)
    }

    /// Highest commit number in the durable store
    pub fn durable_max(&self) -> Result<CommitNumber> {
        self.backend
            .max_commit_number()
            .map_err(|e| stall("cannot read commit number", e))
    }

    /// Release alien transactions no running snapshot predates
    ///
    /// Wired as a timeline retire hook.
    pub fn release_aliens(&self, oldest: CommitNumber) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        while pending.front().map_or(false, |alien| alien.number <= oldest) {
            pending.pop_front();
        }
        before - pending.len()
    }

    /// Alien transactions still queued
    pub fn pending_aliens(&self) -> usize {
        self.pending.lock().len()
    }

    /// Newest record, or `from` when nothing is newer
    fn newest_from(&self, from: &Arc<TxRecord>) -> Arc<TxRecord> {
        let latest = self.timeline.latest();
        if latest.number() > from.number() {
            latest
        } else {
            Arc::clone(from)
        }
    }
}

impl std::fmt::Debug for ReplicationReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationReader")
            .field("timeline", &self.timeline)
            .field("pending_aliens", &self.pending_aliens())
            .finish()
    }
}

/// Catch-up by querying the durable log
#[derive(Debug)]
pub struct PollingReplicator {
    reader: Arc<ReplicationReader>,
}

impl PollingReplicator {
    /// Create a polling replicator
    pub fn new(reader: Arc<ReplicationReader>) -> Self {
        Self { reader }
    }
}

impl Replicator for PollingReplicator {
    fn catch_up(&self, from: &Arc<TxRecord>) -> Result<Arc<TxRecord>> {
        if self.reader.durable_max()? > self.reader.timeline.latest_number() {
            let guard = self.reader.section.enter()?;
            self.reader.poll(&guard)?;
        }
        Ok(self.reader.newest_from(from))
    }

    fn catch_up_for_commit(&self, guard: &SectionGuard<'_>, _from: &Arc<TxRecord>) -> Result<Arc<TxRecord>> {
        self.reader.poll_for_commit(guard)?;
        Ok(self.reader.timeline.latest())
    }
}

/// Catch-up from cluster broadcasts
pub struct PushReplicator {
    reader: Arc<ReplicationReader>,
    cluster: Arc<dyn ClusterCoordinator>,
    server_id: ServerId,
    inbox: Arc<Mutex<Vec<CommitMessage>>>,
    subscription: SubscriptionId,
}

impl PushReplicator {
    /// Subscribe to the cluster's commit broadcasts
    ///
    /// Messages published by `server_id` itself are ignored.
    pub fn new(
        reader: Arc<ReplicationReader>,
        cluster: Arc<dyn ClusterCoordinator>,
        server_id: ServerId,
    ) -> Result<Self> {
        let inbox: Arc<Mutex<Vec<CommitMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let inbox = Arc::clone(&inbox);
            cluster.subscribe(Arc::new(move |message: &CommitMessage| {
                if message.server() != server_id {
                    inbox.lock().push(message.clone());
                }
            }))?
        };
        Ok(Self {
            reader,
            cluster,
            server_id,
            inbox,
            subscription,
        })
    }

    /// Broadcasts received but not applied yet
    pub fn queued(&self) -> usize {
        self.inbox.lock().len()
    }

    /// Apply queued broadcasts in commit-number order
    fn drain(&self, guard: &SectionGuard<'_>) -> Result<usize> {
        let messages = std::mem::take(&mut *self.inbox.lock());
        if messages.is_empty() {
            return Ok(0);
        }
        let ordered: BTreeMap<CommitNumber, CommitMessage> = messages
            .into_iter()
            .map(|message| (message.number(), message))
            .collect();

        let mut applied = 0;
        for (number, message) in ordered {
            let tail = self.reader.timeline.latest_number();
            if number <= tail {
                continue;
            }
            if tail.next() != Some(number) {
                debug!(
                    commit_number = %number,
                    tail = %tail,
                    "Broadcast gap; querying change log"
                );
                applied += self.reader.poll(guard)?;
                if number <= self.reader.timeline.latest_number() {
                    continue;
                }
            }
            applied += self.reader.replay_rows(guard, message.rows()?)?;
        }
        Ok(applied)
    }
}

impl Replicator for PushReplicator {
    fn catch_up(&self, from: &Arc<TxRecord>) -> Result<Arc<TxRecord>> {
        if self.queued() > 0 {
            let guard = self.reader.section.enter()?;
            self.drain(&guard)?;
        }
        Ok(self.reader.newest_from(from))
    }

    fn catch_up_for_commit(&self, guard: &SectionGuard<'_>, _from: &Arc<TxRecord>) -> Result<Arc<TxRecord>> {
        self.drain(guard)?;
        if self.reader.durable_max()? > self.reader.timeline.latest_number() {
            debug!("Change log ahead of broadcasts; polling");
            self.reader.poll_for_commit(guard)?;
        }
        Ok(self.reader.timeline.latest())
    }

    fn announce(&self, _guard: &SectionGuard<'_>, number: CommitNumber, rows: &[ChangeLogRow]) -> Result<()> {
        self.cluster
            .publish(CommitMessage::from_rows(self.server_id, number, rows))
    }
}

impl Drop for PushReplicator {
    fn drop(&mut self) {
        if let Err(e) = self.cluster.unsubscribe(self.subscription) {
            warn!(error = %e, "Failed to unsubscribe from commit broadcasts");
        }
    }
}

impl std::fmt::Debug for PushReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushReplicator")
            .field("server_id", &self.server_id)
            .field("queued", &self.queued())
            .finish()
    }
}
