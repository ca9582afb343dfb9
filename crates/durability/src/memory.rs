//! In-memory backend
//!
//! Holds every table of the shared store behind one `RwLock`. Several
//! engines in one process share a cluster by sharing an
//! `Arc<MemoryBackend>`.

use crate::backend::{Backend, RowLock};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use versa_core::{
    ChangeLogRow, ChangeSet, ClassId, ClassRecord, CommitNumber, Error, Oid, RelationChange,
    Result, ServerId, Value,
};

#[derive(Debug, Default)]
struct Tables {
    /// Ordered by commit number
    change_log: Vec<ChangeLogRow>,
    attributes: FxHashMap<(Oid, String), BTreeMap<CommitNumber, Value>>,
    /// Object → commit that deleted it
    objects: FxHashMap<Oid, Option<CommitNumber>>,
    relations: BTreeSet<(String, Oid, Oid)>,
    classes: Vec<ClassRecord>,
    internal_ids: FxHashMap<ClassId, u32>,
    server_progress: FxHashMap<ServerId, CommitNumber>,
    max_commit: CommitNumber,
}

impl Tables {
    fn check_commit(&self, change_set: &ChangeSet) -> Result<()> {
        change_set.check()?;
        if change_set.commit_number <= self.max_commit {
            return Err(Error::Storage(format!(
                "commit {} is not newer than persisted commit {}",
                change_set.commit_number, self.max_commit
            )));
        }
        Ok(())
    }

    fn apply_change_set(&mut self, change_set: &ChangeSet) {
        let number = change_set.commit_number;
        for oid in &change_set.new_objects {
            self.objects.entry(*oid).or_insert(None);
            let counter = self.internal_ids.entry(oid.class_id()).or_insert(0);
            *counter = (*counter).max(oid.internal_id());
        }
        for write in &change_set.attributes {
            self.attributes
                .entry((write.oid, write.attribute.clone()))
                .or_default()
                .insert(number, write.value.clone());
        }
        for oid in &change_set.deleted_objects {
            self.objects.insert(*oid, Some(number));
        }
        for tuple in &change_set.relations {
            let key = (tuple.relation.clone(), tuple.left, tuple.right);
            match tuple.change {
                RelationChange::Add => {
                    self.relations.insert(key);
                }
                RelationChange::Remove => {
                    self.relations.remove(&key);
                }
            }
        }
        self.change_log.extend(change_set.rows.iter().cloned());
        self.max_commit = number;
    }

    fn insert_class_record(&mut self, record: &ClassRecord) -> bool {
        let taken = self.classes.iter().any(|existing| {
            existing.class_id == record.class_id || existing.class_name == record.class_name
        });
        if !taken {
            self.classes.push(record.clone());
        }
        !taken
    }

    fn prune(&mut self, below: CommitNumber) -> usize {
        let before = self.change_log.len();
        self.change_log.retain(|row| row.commit_number >= below);
        before - self.change_log.len()
    }
}

/// In-memory shared store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of change-log rows currently retained
    pub fn change_log_len(&self) -> usize {
        self.tables.read().change_log.len()
    }

    /// True when the relation tuple is present
    pub fn contains_relation(&self, relation: &str, left: Oid, right: Oid) -> bool {
        self.tables
            .read()
            .relations
            .contains(&(relation.to_string(), left, right))
    }

    pub(crate) fn check_commit(&self, change_set: &ChangeSet) -> Result<()> {
        self.tables.read().check_commit(change_set)
    }

    pub(crate) fn apply_change_set(&self, change_set: &ChangeSet) {
        self.tables.write().apply_change_set(change_set);
    }

    pub(crate) fn apply_class_record(&self, record: &ClassRecord) -> bool {
        self.tables.write().insert_class_record(record)
    }

    pub(crate) fn observe_internal_id(&self, class_id: ClassId, id: u32) {
        let mut tables = self.tables.write();
        let counter = tables.internal_ids.entry(class_id).or_insert(0);
        *counter = (*counter).max(id);
    }

    pub(crate) fn apply_prune(&self, below: CommitNumber) -> usize {
        self.tables.write().prune(below)
    }
}

impl Backend for MemoryBackend {
    fn load_attribute(&self, oid: Oid, attribute: &str, as_of: CommitNumber) -> Result<Option<Value>> {
        let tables = self.tables.read();
        if !tables.objects.contains_key(&oid) {
            return Ok(None);
        }
        let value = tables
            .attributes
            .get(&(oid, attribute.to_string()))
            .and_then(|history| history.range(..=as_of).next_back())
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null);
        Ok(Some(value))
    }

    fn persist_change_set(&self, change_set: &ChangeSet) -> Result<()> {
        let mut tables = self.tables.write();
        tables.check_commit(change_set)?;
        tables.apply_change_set(change_set);
        Ok(())
    }

    fn query_change_log_since(&self, after: CommitNumber, _lock: RowLock) -> Result<Vec<ChangeLogRow>> {
        let tables = self.tables.read();
        let start = tables
            .change_log
            .partition_point(|row| row.commit_number <= after);
        Ok(tables.change_log[start..].to_vec())
    }

    fn max_commit_number(&self) -> Result<CommitNumber> {
        Ok(self.tables.read().max_commit)
    }

    fn load_class_records(&self) -> Result<Vec<ClassRecord>> {
        Ok(self.tables.read().classes.clone())
    }

    fn insert_class_record(&self, record: &ClassRecord) -> Result<bool> {
        Ok(self.apply_class_record(record))
    }

    fn next_internal_id(&self, class_id: ClassId) -> Result<u32> {
        let mut tables = self.tables.write();
        let counter = tables.internal_ids.entry(class_id).or_insert(0);
        let next = counter
            .checked_add(1)
            .ok_or_else(|| Error::Storage(format!("internal ids of class {} exhausted", class_id)))?;
        *counter = next;
        Ok(next)
    }

    fn contains_object(&self, oid: Oid) -> Result<bool> {
        Ok(self.tables.read().objects.contains_key(&oid))
    }

    fn deleted_at(&self, oid: Oid) -> Result<Option<CommitNumber>> {
        Ok(self.tables.read().objects.get(&oid).copied().flatten())
    }

    fn record_server_progress(&self, server: ServerId, number: CommitNumber) -> Result<()> {
        self.tables.write().server_progress.insert(server, number);
        Ok(())
    }

    fn remove_server_progress(&self, server: ServerId) -> Result<()> {
        self.tables.write().server_progress.remove(&server);
        Ok(())
    }

    fn min_server_progress(&self) -> Result<Option<CommitNumber>> {
        Ok(self.tables.read().server_progress.values().copied().min())
    }

    fn prune_change_log(&self, below: CommitNumber) -> Result<usize> {
        Ok(self.apply_prune(below))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
