//! Replication Tests
//!
//! Foreign commits reach a process through its replication reader.

use crate::common::*;
use versadb::core::ClassRecord;

fn invoice_schemas() -> Vec<ClassSchema> {
    let mut schemas = schemas();
    schemas.push(ClassSchema::new("Invoice").attribute("amount"));
    schemas
}

#[test]
fn invoice_visible_on_second_process_only_after_replay() {
    let c = TestCluster::new();
    // Invoice was registered with id 7 by an earlier deployment
    assert!(c
        .backend
        .insert_class_record(&ClassRecord::new("Invoice", ClassId::new(7)))
        .unwrap());
    for _ in 0..41 {
        c.backend.next_internal_id(ClassId::new(7)).unwrap();
    }

    let p1 = c.process_with(ReplicationMode::Polling, invoice_schemas());
    let p2 = c.process_with(ReplicationMode::Polling, invoice_schemas());

    // p2 pins a snapshot before the invoice exists
    let mut early = p2.begin(true);
    p2.root_object().unwrap();
    p2.get_attribute(&mut early, ROOT_OID, "label").unwrap();
    let start = p2.current_commit_number();

    let invoice = p1
        .with_transaction(false, |db, tx| {
            let oid = db.create_object(tx, "Invoice")?;
            db.set_attribute(tx, oid, "amount", 1250i64)?;
            Ok(oid)
        })
        .unwrap();
    assert_eq!(invoice.class_id(), ClassId::new(7));
    assert_eq!(invoice.internal_id(), 42);

    // Not replayed yet
    assert_eq!(p2.current_commit_number(), start);
    assert!(p2.manager().identity().get(invoice).is_none());

    let tail = p2.catch_up().unwrap();
    assert_eq!(tail, p1.current_commit_number());
    let replayed = p2.manager().identity().get(invoice).expect("materialized by replay");
    assert_eq!(replayed.oid(), invoice);
    assert!(Arc::ptr_eq(&replayed, &p2.resolve_object(ClassId::new(7), 42).unwrap()));
    assert_eq!(get(&p2, invoice, "amount"), Value::Int(1250));

    // The early snapshot predates the invoice's amount
    assert_eq!(p2.get_attribute(&mut early, invoice, "amount").unwrap(), Value::Null);
    assert_eq!(p2.metrics().aliens_replayed, 1);
}

#[test]
fn replaying_twice_is_idempotent() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();
    let account = create_account(&p1, 3);
    set_int(&p1, account, "balance", 4);

    let first = p2.catch_up().unwrap();
    let second = p2.catch_up().unwrap();
    assert_eq!(first, second);
    assert_eq!(p2.metrics().aliens_replayed, 2);

    let object = p2.manager().identity().get(account).unwrap();
    let chain_len = object.slot("balance").len();
    p2.catch_up().unwrap();
    assert_eq!(object.slot("balance").len(), chain_len);
    assert_eq!(get(&p2, account, "balance"), Value::Int(4));
}

#[test]
fn persist_query_replay_round_trip() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();

    let writes: Vec<(Oid, &str, Value)> = p1
        .with_transaction(false, |db, tx| {
            let account = db.create_object(tx, "Account")?;
            let person = db.create_object(tx, "Person")?;
            db.set_attribute(tx, account, "balance", 99i64)?;
            db.set_attribute(tx, account, "owner", person)?;
            db.set_attribute(tx, person, "name", "grace")?;
            Ok(vec![
                (account, "balance", Value::Int(99)),
                (account, "owner", Value::Ref(person)),
                (person, "name", Value::from("grace")),
            ])
        })
        .unwrap();
    let number = p1.current_commit_number();

    let rows = c
        .backend
        .query_change_log_since(number.prev(), RowLock::Shared)
        .unwrap();
    let mut logged: Vec<(Oid, String)> = rows
        .iter()
        .map(|row| (row.object_id, row.attribute.clone()))
        .collect();
    logged.sort();
    let mut expected: Vec<(Oid, String)> = writes
        .iter()
        .map(|(oid, attribute, _)| (*oid, attribute.to_string()))
        .collect();
    expected.sort();
    assert_eq!(logged, expected);
    assert!(rows.iter().all(|row| row.commit_number == number));

    p2.catch_up().unwrap();
    for (oid, attribute, value) in writes {
        assert_eq!(get(&p2, oid, attribute), value);
    }
}

#[test]
fn class_registered_by_late_peer_is_installed_on_replay() {
    let c = TestCluster::new();
    let p1 = c.process();

    let mut extended = schemas();
    extended.push(ClassSchema::new("Ledger").attribute("total"));
    let p2 = c.process_with(ReplicationMode::Polling, extended);

    let ledger = p2
        .with_transaction(false, |db, tx| {
            let oid = db.create_object(tx, "Ledger")?;
            db.set_attribute(tx, oid, "total", 1i64)?;
            Ok(oid)
        })
        .unwrap();

    // p1 replays the commit but has no schema for the class
    p1.catch_up().unwrap();
    assert_eq!(p1.current_commit_number(), p2.current_commit_number());
    assert!(matches!(
        p1.object_for_oid(ledger.raw()),
        Err(Error::UnknownClass(name)) if name.contains("Ledger")
    ));
}

#[test]
fn aliens_released_once_no_snapshot_predates_them() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();

    let mut pinned = p2.begin(true);
    p2.get_attribute(&mut pinned, ROOT_OID, "label").unwrap();

    let account = create_account(&p1, 1);
    set_int(&p1, account, "balance", 2);
    p2.catch_up().unwrap();
    assert_eq!(p2.pending_aliens(), 2);

    // Finishing the pinning transaction retires the old records
    p2.commit(&mut pinned).unwrap();
    assert_eq!(p2.pending_aliens(), 0);
    assert_eq!(get(&p2, account, "balance"), Value::Int(2));
}
