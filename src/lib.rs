//! # VersaDB
//!
//! Optimistic multi-version object store with cross-process replication.
//!
//! Objects are graphs of attribute slots. Every slot keeps a chain of
//! committed versions; transactions read a consistent snapshot without
//! locks and are validated at commit time. Several processes share one
//! durable store and learn about each other's commits by replaying the
//! shared change log.
//!
//! ## Quick Start
//!
//! ```ignore
//! use versadb::prelude::*;
//!
//! let db = Database::builder()
//!     .class(ClassSchema::new("Account").attribute("balance"))
//!     .open()?;
//!
//! let account = db.with_transaction(false, |db, tx| {
//!     let oid = db.create_object(tx, "Account")?;
//!     db.set_attribute(tx, oid, "balance", 100i64)?;
//!     Ok(oid)
//! })?;
//!
//! let mut tx = db.begin(true);
//! assert_eq!(db.get_attribute(&mut tx, account, "balance")?, Value::Int(100));
//! db.commit(&mut tx)?;
//! ```
//!
//! ## Layers
//!
//! - [`core`] - identifiers, values, records and the error type
//! - [`storage`] - version chains, objects, identity map, class registry
//! - [`durability`] - the backend trait, memory and file backends
//! - [`cluster`] - server ids, commit lock, commit broadcast
//! - [`concurrency`] - timeline, transactions, validation, commit protocol
//! - [`engine`] - database facade, replication, configuration, cleaner

#![warn(missing_docs)]

pub mod prelude;

pub use versa_cluster as cluster;
pub use versa_concurrency as concurrency;
pub use versa_core as core;
pub use versa_durability as durability;
pub use versa_engine as engine;
pub use versa_storage as storage;

pub use versa_core::{Error, Result};
pub use versa_engine::{Database, DatabaseBuilder, EngineConfig, ReplicationMode};
