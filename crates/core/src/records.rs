//! Durable and wire records
//!
//! - [`ChangeLogRow`]: one row of the shared change log
//! - [`ClassRecord`]: a persisted class id assignment
//! - [`CommitMessage`]: the broadcast form of a commit (push replication)
//! - [`ChangeSet`]: everything a commit persists

use crate::error::{Error, Result};
use crate::types::{ClassId, CommitNumber, Oid, ServerId};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One row of the change log
///
/// A commit writes one row per changed attribute, or a single padding row
/// (`object_id == Oid::PADDING`) when it changes no attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogRow {
    /// Changed object, or the padding marker
    pub object_id: Oid,
    /// Changed attribute (empty for padding rows)
    pub attribute: String,
    /// Commit that made the change
    pub commit_number: CommitNumber,
}

impl ChangeLogRow {
    /// Row for one changed attribute
    pub fn new(object_id: Oid, attribute: impl Into<String>, commit_number: CommitNumber) -> Self {
        Self {
            object_id,
            attribute: attribute.into(),
            commit_number,
        }
    }

    /// Padding row for a commit that changed no attribute
    pub fn padding(commit_number: CommitNumber) -> Self {
        Self {
            object_id: Oid::PADDING,
            attribute: String::new(),
            commit_number,
        }
    }

    /// True for padding rows
    pub fn is_padding(&self) -> bool {
        self.object_id.is_padding()
    }
}

/// Persisted `(class_name, class_id)` assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    /// Fully qualified class name
    pub class_name: String,
    /// Assigned id
    pub class_id: ClassId,
}

impl ClassRecord {
    /// Create a class record
    pub fn new(class_name: impl Into<String>, class_id: ClassId) -> Self {
        Self {
            class_name: class_name.into(),
            class_id,
        }
    }
}

/// Commit broadcast to peers
///
/// `object_ids` and `attribute_names` are parallel arrays; entry `i` of
/// each describes one change-log row of the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    /// Publishing server
    pub server_id: u32,
    /// Commit being announced
    pub commit_number: u32,
    /// Changed objects (raw oids)
    pub object_ids: Vec<u64>,
    /// Changed attributes
    pub attribute_names: Vec<String>,
}

impl CommitMessage {
    /// Build the broadcast form of a commit from its change-log rows
    pub fn from_rows(server_id: ServerId, commit_number: CommitNumber, rows: &[ChangeLogRow]) -> Self {
        Self {
            server_id: server_id.get(),
            commit_number: commit_number.get(),
            object_ids: rows.iter().map(|row| row.object_id.raw()).collect(),
            attribute_names: rows.iter().map(|row| row.attribute.clone()).collect(),
        }
    }

    /// Publishing server
    pub fn server(&self) -> ServerId {
        ServerId::new(self.server_id)
    }

    /// Commit being announced
    pub fn number(&self) -> CommitNumber {
        CommitNumber::new(self.commit_number)
    }

    /// Expand back into change-log rows
    ///
    /// Rejects messages whose parallel arrays disagree in length.
    pub fn rows(&self) -> Result<Vec<ChangeLogRow>> {
        if self.object_ids.len() != self.attribute_names.len() {
            return Err(Error::Corruption(format!(
                "commit message {} carries {} object ids but {} attribute names",
                self.commit_number,
                self.object_ids.len(),
                self.attribute_names.len()
            )));
        }
        let number = self.number();
        Ok(self
            .object_ids
            .iter()
            .zip(&self.attribute_names)
            .map(|(oid, attribute)| ChangeLogRow::new(Oid::from_raw(*oid), attribute.clone(), number))
            .collect())
    }
}

/// One attribute value written by a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeWrite {
    /// Object written
    pub oid: Oid,
    /// Attribute written
    pub attribute: String,
    /// New value
    pub value: Value,
}

/// Direction of a relation tuple edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationChange {
    /// Tuple inserted
    Add,
    /// Tuple removed
    Remove,
}

/// Many-to-many relation tuple edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTuple {
    /// Relation name
    pub relation: String,
    /// First participant
    pub left: Oid,
    /// Second participant
    pub right: Oid,
    /// Insert or delete
    pub change: RelationChange,
}

/// Everything one commit persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Commit number being persisted
    pub commit_number: CommitNumber,
    /// Committing server
    pub server_id: ServerId,
    /// Attribute values
    pub attributes: Vec<AttributeWrite>,
    /// Objects created
    pub new_objects: Vec<Oid>,
    /// Objects deleted
    pub deleted_objects: Vec<Oid>,
    /// Relation tuple edits
    pub relations: Vec<RelationTuple>,
    /// Change-log rows
    pub rows: Vec<ChangeLogRow>,
}

impl ChangeSet {
    /// Check the internal consistency of a change set before it is persisted
    pub fn check(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::Internal(format!(
                "change set {} has no change-log rows",
                self.commit_number
            )));
        }
        if let Some(row) = self.rows.iter().find(|row| row.commit_number != self.commit_number) {
            return Err(Error::Internal(format!(
                "change set {} carries a row for commit {}",
                self.commit_number, row.commit_number
            )));
        }
        Ok(())
    }
}
