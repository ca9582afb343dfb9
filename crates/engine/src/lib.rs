//! Engine layer for VersaDB
//!
//! This crate assembles the lower layers into a running process:
//! - Database: the public API and the open/bootstrap sequence
//! - EngineConfig: TOML-loadable tunables
//! - Replication: alien-transaction replay, polling and push replicators
//! - ChangeLogCleaner: periodic pruning of the shared change log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleaner;
pub mod config;
pub mod database;
pub mod replication;

pub use cleaner::{clean_once, ChangeLogCleaner};
pub use config::{EngineConfig, ReplicationMode};
pub use database::{Database, DatabaseBuilder};
pub use replication::{AlienTransaction, PollingReplicator, PushReplicator, ReplicationReader};

pub use versa_storage::ClassSchema;
