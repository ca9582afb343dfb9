//! Read-set validation
//!
//! A write transaction is valid at commit number `N` when every box it read
//! still shows, at `N`, the exact body the transaction observed. Bodies are
//! compared by identity: any body appended after the snapshot, even one
//! carrying an equal value, is a conflict.
//!
//! Read-only transactions are never validated.

use crate::transaction::ReadEntry;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use versa_core::{CommitNumber, SlotKey};

/// Outcome of validating a read set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Slots whose visible body changed, sorted
    pub conflicts: Vec<SlotKey>,
}

impl ValidationResult {
    /// True when no read was invalidated
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of invalidated reads
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Validate `read_set` against the version chains at `at`
///
/// A box whose history no longer reaches back to `at` counts as a conflict.
pub fn validate_read_set(read_set: &FxHashMap<SlotKey, ReadEntry>, at: CommitNumber) -> ValidationResult {
    let mut conflicts: Vec<SlotKey> = read_set
        .iter()
        .filter(|(_, (vbox, observed))| match vbox.body_at(at) {
            Some(current) => !Arc::ptr_eq(&current, observed),
            None => true,
        })
        .map(|(key, _)| key.clone())
        .collect();
    conflicts.sort();
    ValidationResult { conflicts }
}
