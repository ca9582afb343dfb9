//! Concurrency layer for VersaDB
//!
//! This crate implements the optimistic multi-version protocol:
//! - Timeline: chain of commit records with running-transaction counts
//! - CriticalSection: local mutex plus cluster lock around replay and commit
//! - TransactionContext: snapshot, read set and write set of one transaction
//! - Read-set validation against the version chains
//! - TransactionManager: begin, read, write, commit, abort, suspend, resume
//! - Commit listeners and transaction metrics
//!
//! Replication strategies plug in through the [`Replicator`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod listener;
pub mod manager;
pub mod metrics;
pub mod replicator;
pub mod section;
pub mod timeline;
pub mod transaction;
pub mod validation;
pub mod write_set;

pub use listener::{CommitListener, ListenerId, ListenerRegistry, TxIntrospector};
pub use manager::{TransactionLimits, TransactionManager};
pub use metrics::{MetricsSnapshot, TransactionMetrics};
pub use replicator::{LocalReplicator, Replicator};
pub use section::{CriticalSection, SectionGuard};
pub use timeline::{RetireHook, Timeline, TxRecord};
pub use transaction::{TransactionContext, TransactionKind, TransactionStatus, WriteState};
pub use validation::{validate_read_set, ValidationResult};
pub use write_set::WriteSet;
