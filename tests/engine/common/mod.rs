//! Shared fixtures for engine integration tests

#![allow(dead_code)]

pub use std::sync::Arc;
pub use versadb::durability::RowLock;
pub use versadb::prelude::*;

/// Classes every test process declares
pub fn schemas() -> Vec<ClassSchema> {
    vec![
        ClassSchema::new("Account").attribute("balance").attribute("owner"),
        ClassSchema::new("Person").attribute("name"),
    ]
}

/// Install a test log subscriber once per binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Processes sharing one store and one cluster
pub struct TestCluster {
    pub backend: Arc<MemoryBackend>,
    pub cluster: Arc<LocalCluster>,
}

impl TestCluster {
    pub fn new() -> Self {
        init_tracing();
        Self {
            backend: Arc::new(MemoryBackend::new()),
            cluster: Arc::new(LocalCluster::new()),
        }
    }

    /// Open one more polling process with the common schema
    pub fn process(&self) -> Database {
        self.process_with(ReplicationMode::Polling, schemas())
    }

    /// Open one more process
    pub fn process_with(&self, mode: ReplicationMode, schemas: Vec<ClassSchema>) -> Database {
        Database::builder()
            .backend(self.backend.clone())
            .cluster(self.cluster.clone())
            .classes(schemas)
            .replication(mode)
            .open()
            .expect("open process")
    }
}

/// Create an account with `balance` and return its oid
pub fn create_account(db: &Database, balance: i64) -> Oid {
    db.with_transaction(false, |db, tx| {
        let oid = db.create_object(tx, "Account")?;
        db.set_attribute(tx, oid, "balance", balance)?;
        Ok(oid)
    })
    .expect("create account")
}

/// Overwrite `oid.attribute` in its own transaction
pub fn set_int(db: &Database, oid: Oid, attribute: &str, value: i64) -> CommitNumber {
    let mut tx = db.begin(false);
    db.set_attribute(&mut tx, oid, attribute, value).expect("write");
    db.commit(&mut tx)
        .expect("commit")
        .expect("commit number")
}

/// Read `oid.attribute` in a fresh read-only transaction
pub fn get(db: &Database, oid: Oid, attribute: &str) -> Value {
    let mut tx = db.begin(true);
    let value = db.get_attribute(&mut tx, oid, attribute).expect("read");
    db.commit(&mut tx).expect("commit");
    value
}
