//! Convenient imports for VersaDB
//!
//! ```ignore
//! use versadb::prelude::*;
//! ```

// Entry point
pub use versa_engine::{Database, DatabaseBuilder, EngineConfig, ReplicationMode};

// Error handling
pub use versa_core::{Error, Result};

// Identifiers and values
pub use versa_core::{ClassId, CommitNumber, Oid, ServerId, Value, ROOT_OID};

// Schema and transactions
pub use versa_concurrency::{CommitListener, TransactionContext, TxIntrospector};
pub use versa_storage::ClassSchema;

// Backends and clusters
pub use versa_cluster::{ClusterCoordinator, LocalCluster};
pub use versa_durability::{Backend, DurabilityMode, FileBackend, MemoryBackend};
