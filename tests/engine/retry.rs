//! Retry Loop Tests
//!
//! `with_transaction` retries conflicts silently up to the configured
//! bound and then surfaces the last conflict.

use crate::common::*;

fn process_with_retries(c: &TestCluster, retries: u32) -> Database {
    Database::builder()
        .backend(c.backend.clone())
        .cluster(c.cluster.clone())
        .classes(schemas())
        .max_commit_retries(retries)
        .open()
        .unwrap()
}

#[test]
fn retries_exhaust_after_configured_bound() {
    let c = TestCluster::new();
    let db = process_with_retries(&c, 3);
    let peer = c.process();
    let x = create_account(&db, 0);
    let y = create_account(&db, 0);

    let mut calls = 0;
    let result = db.with_transaction(false, |db, tx| {
        calls += 1;
        let seen = db.get_attribute(tx, x, "balance")?;
        // A peer invalidates the read before every commit
        set_int(&peer, x, "balance", 100 + calls);
        db.set_attribute(tx, y, "balance", seen.as_int().unwrap_or(0))
    });

    let err = result.unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {}", err);
    assert_eq!(calls, 3);
    assert_eq!(db.metrics().conflicts, 3);
    assert_eq!(get(&db, y, "balance"), Value::Int(0));
}

#[test]
fn retry_succeeds_once_interference_stops() {
    let c = TestCluster::new();
    let db = process_with_retries(&c, 5);
    let peer = c.process();
    let x = create_account(&db, 0);
    let y = create_account(&db, 0);

    let mut calls = 0;
    let copied = db
        .with_transaction(false, |db, tx| {
            calls += 1;
            let seen = db.get_attribute(tx, x, "balance")?;
            if calls == 1 {
                set_int(&peer, x, "balance", 7);
            }
            db.set_attribute(tx, y, "balance", seen.clone())?;
            Ok(seen)
        })
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(copied, Value::Int(7));
    assert_eq!(get(&db, y, "balance"), Value::Int(7));
}

#[test]
fn non_retryable_errors_surface_immediately() {
    let c = TestCluster::new();
    let db = process_with_retries(&c, 5);

    let mut calls = 0;
    let result = db.with_transaction(true, |db, tx| {
        calls += 1;
        db.create_object(tx, "Account")
    });
    assert!(matches!(result, Err(Error::IllegalWrite(_))));
    assert_eq!(calls, 1);
}
