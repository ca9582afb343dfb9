//! Durability mode for the file log
//!
//! Controls when appended records are fsynced.

use serde::{Deserialize, Serialize};

/// Fsync policy of [`FileBackend`](crate::FileBackend)
///
/// | Mode | fsync | Data loss window |
/// |------|-------|------------------|
/// | Strict | every record | none |
/// | Batched | every `batch_size` records and on flush | up to `batch_size` records |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every record
    Strict,
    /// fsync after every `batch_size` records
    Batched {
        /// Records between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// True when every record is fsynced before the call returns
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }

    /// True when `pending` unsynced records call for an fsync
    pub fn should_sync(&self, pending: usize) -> bool {
        match self {
            DurabilityMode::Strict => pending > 0,
            DurabilityMode::Batched { batch_size } => pending >= (*batch_size).max(1),
        }
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Strict => "fsync every record",
            DurabilityMode::Batched { .. } => "batched fsync",
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Batched { batch_size: 64 }
    }
}
