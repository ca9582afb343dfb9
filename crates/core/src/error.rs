//! Error types for VersaDB
//!
//! A single error enum is shared by all layers. The engine never retries on
//! its own; callers use [`Error::is_retryable`] to decide whether a unit of
//! work should run again against a fresh snapshot.

use crate::types::{CommitNumber, Oid};
use thiserror::Error;

/// All VersaDB errors
#[derive(Debug, Error)]
pub enum Error {
    /// A read required a version the process no longer has and the backend
    /// could not produce
    #[error("version of {oid}.{attribute} at commit {snapshot} is not available")]
    VersionUnavailable {
        /// Object being read
        oid: Oid,
        /// Attribute being read
        attribute: String,
        /// Snapshot of the reading transaction
        snapshot: CommitNumber,
    },

    /// Read-set validation failed at commit time
    #[error("commit conflict: snapshot {snapshot} is stale against {latest} ({conflicts} conflicting reads)")]
    CommitConflict {
        /// Snapshot the transaction read from
        snapshot: CommitNumber,
        /// Commit number validated against
        latest: CommitNumber,
        /// Number of read-set entries that changed
        conflicts: usize,
    },

    /// Write attempted in a read-only or finished transaction
    #[error("illegal write: {0}")]
    IllegalWrite(String),

    /// A suspended transaction became invalid while suspended
    #[error("resumed transaction with snapshot {snapshot} is invalid at {latest}")]
    ResumeInvalid {
        /// Snapshot the transaction read from
        snapshot: CommitNumber,
        /// Commit number validated against
        latest: CommitNumber,
    },

    /// The change log or the cluster could not be reached
    #[error("replication stalled: {0}")]
    ReplicationStall(String),

    /// A class id or name this process does not know
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// The object does not exist or was deleted
    #[error("missing object: {0}")]
    MissingObject(Oid),

    /// Operation on a transaction in the wrong state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Durable data failed integrity checks
    #[error("corruption: {0}")]
    Corruption(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for VersaDB operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if the failed unit of work may succeed when run again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CommitConflict { .. } | Error::ResumeInvalid { .. }
        )
    }

    /// Check if this is a commit-time conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CommitConflict { .. })
    }

    /// Check if the process can no longer make progress safely
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::Internal(_) | Error::Io(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
