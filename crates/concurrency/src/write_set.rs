//! Write sets
//!
//! A [`WriteSet`] buffers everything a write transaction changes until
//! commit: attribute values, created and deleted objects, and relation
//! tuple edits. At commit it becomes the durable [`ChangeSet`].

use std::collections::{BTreeMap, BTreeSet};
use versa_core::{
    AttributeWrite, ChangeLogRow, ChangeSet, CommitNumber, Oid, RelationChange, RelationTuple,
    ServerId, SlotKey, Value,
};

/// Buffered changes of one write transaction
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    attributes: BTreeMap<SlotKey, Value>,
    new_objects: BTreeSet<Oid>,
    deleted_objects: BTreeSet<Oid>,
    /// Last edit wins per tuple
    relations: BTreeMap<(String, Oid, Oid), RelationChange>,
}

impl WriteSet {
    /// Create an empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an attribute value
    pub fn set_attribute(&mut self, key: SlotKey, value: Value) {
        self.attributes.insert(key, value);
    }

    /// Buffered value of a slot
    pub fn get(&self, key: &SlotKey) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Record a created object
    pub fn add_new_object(&mut self, oid: Oid) {
        self.new_objects.insert(oid);
    }

    /// True when the object was created by this transaction
    pub fn is_new(&self, oid: Oid) -> bool {
        self.new_objects.contains(&oid)
    }

    /// Record a deleted object
    pub fn delete_object(&mut self, oid: Oid) {
        self.deleted_objects.insert(oid);
    }

    /// Record a relation tuple edit
    pub fn relate(&mut self, relation: impl Into<String>, left: Oid, right: Oid, change: RelationChange) {
        self.relations.insert((relation.into(), left, right), change);
    }

    /// True when nothing would be persisted
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
            && self.new_objects.is_empty()
            && self.deleted_objects.is_empty()
            && self.relations.is_empty()
    }

    /// Number of buffered attribute values
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Buffered attribute values, ordered by slot
    pub fn attributes(&self) -> impl Iterator<Item = (&SlotKey, &Value)> {
        self.attributes.iter()
    }

    /// Objects created by this transaction
    pub fn new_objects(&self) -> impl Iterator<Item = Oid> + '_ {
        self.new_objects.iter().copied()
    }

    /// Objects deleted by this transaction
    pub fn deleted_objects(&self) -> impl Iterator<Item = Oid> + '_ {
        self.deleted_objects.iter().copied()
    }

    /// Pre-existing objects whose attributes changed
    pub fn modified_objects(&self) -> BTreeSet<Oid> {
        self.attributes
            .keys()
            .map(|key| key.oid)
            .filter(|oid| !self.new_objects.contains(oid))
            .collect()
    }

    /// Relation tuple edits
    pub fn relation_changes(&self) -> Vec<RelationTuple> {
        self.relations
            .iter()
            .map(|((relation, left, right), change)| RelationTuple {
                relation: relation.clone(),
                left: *left,
                right: *right,
                change: *change,
            })
            .collect()
    }

    /// Durable form of this write set at `number`
    ///
    /// One change-log row per attribute value, or a single padding row when
    /// no attribute changed.
    pub fn to_change_set(&self, server_id: ServerId, number: CommitNumber) -> ChangeSet {
        let mut rows: Vec<ChangeLogRow> = self
            .attributes
            .keys()
            .map(|key| ChangeLogRow::new(key.oid, key.attribute.clone(), number))
            .collect();
        if rows.is_empty() {
            rows.push(ChangeLogRow::padding(number));
        }
        ChangeSet {
            commit_number: number,
            server_id,
            attributes: self
                .attributes
                .iter()
                .map(|(key, value)| AttributeWrite {
                    oid: key.oid,
                    attribute: key.attribute.clone(),
                    value: value.clone(),
                })
                .collect(),
            new_objects: self.new_objects.iter().copied().collect(),
            deleted_objects: self.deleted_objects.iter().copied().collect(),
            relations: self.relation_changes(),
            rows,
        }
    }

    /// Discard every buffered change
    pub fn clear(&mut self) {
        self.attributes.clear();
        self.new_objects.clear();
        self.deleted_objects.clear();
        self.relations.clear();
    }
}
