//! Snapshot Visibility Tests
//!
//! Reads see the newest version at or below the transaction's snapshot.

use crate::common::*;

// ============================================================================
// Single process
// ============================================================================

#[test]
fn committed_value_visible_to_later_transaction() {
    let c = TestCluster::new();
    let db = c.process();
    let account = create_account(&db, 100);

    assert_eq!(get(&db, account, "balance"), Value::Int(100));
    assert_eq!(get(&db, account, "owner"), Value::Null);
}

#[test]
fn snapshot_is_stable_while_others_commit() {
    let c = TestCluster::new();
    let db = c.process();
    let account = create_account(&db, 100);

    let mut reader = db.begin(true);
    assert_eq!(
        db.get_attribute(&mut reader, account, "balance").unwrap(),
        Value::Int(100)
    );

    set_int(&db, account, "balance", 200);
    set_int(&db, account, "balance", 300);

    assert_eq!(
        db.get_attribute(&mut reader, account, "balance").unwrap(),
        Value::Int(100)
    );
    assert_eq!(db.commit(&mut reader).unwrap(), None);
    assert_eq!(get(&db, account, "balance"), Value::Int(300));
}

#[test]
fn own_writes_are_visible_before_commit() {
    let c = TestCluster::new();
    let db = c.process();
    let account = create_account(&db, 1);

    let mut tx = db.begin(false);
    db.set_attribute(&mut tx, account, "balance", 2i64).unwrap();
    assert_eq!(db.get_attribute(&mut tx, account, "balance").unwrap(), Value::Int(2));
    db.abort(&mut tx).unwrap();

    assert_eq!(get(&db, account, "balance"), Value::Int(1));
}

#[test]
fn deleted_object_is_missing_from_later_snapshots() {
    let c = TestCluster::new();
    let db = c.process();
    let account = create_account(&db, 10);

    let mut before = db.begin(true);
    assert!(db.read_object(&mut before, account).is_ok());

    db.with_transaction(false, |db, tx| db.delete_object(tx, account))
        .unwrap();

    // The older snapshot still sees the object
    assert!(db.read_object(&mut before, account).is_ok());

    let mut after = db.begin(true);
    assert!(matches!(
        db.read_object(&mut after, account),
        Err(Error::MissingObject(oid)) if oid == account
    ));
}

#[test]
fn deleted_object_cannot_be_resolved_or_written() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();
    let account = create_account(&p1, 10);
    let person = p1
        .with_transaction(false, |db, tx| db.create_object(tx, "Person"))
        .unwrap();
    p1.with_transaction(false, |db, tx| db.delete_object(tx, account))
        .unwrap();

    for db in [&p1, &p2] {
        assert!(matches!(
            db.resolve_object(account.class_id(), account.internal_id()),
            Err(Error::MissingObject(oid)) if oid == account
        ));
        assert!(matches!(
            db.object_for_oid(account.raw()),
            Err(Error::MissingObject(_))
        ));

        let mut tx = db.begin(false);
        assert!(matches!(
            db.set_attribute(&mut tx, account, "balance", 11i64),
            Err(Error::MissingObject(_))
        ));
        assert!(matches!(
            db.relate(&mut tx, "holders", account, person),
            Err(Error::MissingObject(_))
        ));
        assert!(matches!(
            db.delete_object(&mut tx, account),
            Err(Error::MissingObject(_))
        ));
        assert_eq!(db.commit(&mut tx).unwrap(), None);
    }
    assert_eq!(c.backend.max_commit_number().unwrap(), CommitNumber::new(4));
}

#[test]
fn aborted_creation_is_missing_everywhere() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();

    let mut creator = p1.begin(false);
    let ghost = p1.create_object(&mut creator, "Account").unwrap();
    p1.set_attribute(&mut creator, ghost, "balance", 5i64).unwrap();
    p1.abort(&mut creator).unwrap();

    for db in [&p1, &p2] {
        assert!(matches!(db.object_for_oid(ghost.raw()), Err(Error::MissingObject(_))));

        let mut reader = db.begin(true);
        assert!(matches!(
            db.get_attribute(&mut reader, ghost, "balance"),
            Err(Error::MissingObject(oid)) if oid == ghost
        ));

        let mut writer = db.begin(false);
        assert!(matches!(
            db.set_attribute(&mut writer, ghost, "balance", 1i64),
            Err(Error::MissingObject(_))
        ));
        assert_eq!(db.commit(&mut writer).unwrap(), None);
    }
    assert!(!c.backend.contains_object(ghost).unwrap());
}

#[test]
fn relations_are_symmetric() {
    let c = TestCluster::new();
    let db = c.process();
    let account = create_account(&db, 0);
    let person = db
        .with_transaction(false, |db, tx| {
            let person = db.create_object(tx, "Person")?;
            db.relate(tx, "holders", account, person)?;
            Ok(person)
        })
        .unwrap();

    let mut tx = db.begin(true);
    assert!(db.related(&mut tx, account, "holders").unwrap().contains(&person));
    assert!(db.related(&mut tx, person, "holders").unwrap().contains(&account));
    db.commit(&mut tx).unwrap();

    db.with_transaction(false, |db, tx| db.unrelate(tx, "holders", person, account))
        .unwrap();
    let mut tx = db.begin(true);
    assert!(db.related(&mut tx, account, "holders").unwrap().is_empty());
    assert!(db.related(&mut tx, person, "holders").unwrap().is_empty());
}

#[test]
fn unknown_lookups_fail() {
    let c = TestCluster::new();
    let db = c.process();

    assert!(matches!(
        db.resolve_object(ClassId::new(1), 999),
        Err(Error::MissingObject(_))
    ));
    assert!(matches!(
        db.resolve_object(ClassId::new(77), 1),
        Err(Error::UnknownClass(_))
    ));
    let mut tx = db.begin(false);
    assert!(matches!(
        db.create_object(&mut tx, "Spaceship"),
        Err(Error::UnknownClass(_))
    ));
}

#[test]
fn read_only_transaction_rejects_writes() {
    let c = TestCluster::new();
    let db = c.process();
    let account = create_account(&db, 5);

    let mut tx = db.begin(true);
    assert!(matches!(
        db.set_attribute(&mut tx, account, "balance", 6i64),
        Err(Error::IllegalWrite(_))
    ));
    assert!(matches!(
        db.create_object(&mut tx, "Account"),
        Err(Error::IllegalWrite(_))
    ));
}

// ============================================================================
// Across processes
// ============================================================================

#[test]
fn peer_commit_visible_after_catch_up() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();
    let account = create_account(&p1, 42);

    // A new transaction catches up on its first access
    assert_eq!(get(&p2, account, "balance"), Value::Int(42));
    assert_eq!(p2.current_commit_number(), p1.current_commit_number());
}

#[test]
fn remote_commit_is_never_seen_half_applied() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();
    let (a, b) = p1
        .with_transaction(false, |db, tx| {
            let a = db.create_object(tx, "Account")?;
            let b = db.create_object(tx, "Account")?;
            db.set_attribute(tx, a, "balance", 50i64)?;
            db.set_attribute(tx, b, "balance", 50i64)?;
            Ok((a, b))
        })
        .unwrap();

    let mut reader = p2.begin(true);
    let before_a = p2.get_attribute(&mut reader, a, "balance").unwrap();

    // Transfer on p1 changes both sides in one commit
    p1.with_transaction(false, |db, tx| {
        db.set_attribute(tx, a, "balance", 20i64)?;
        db.set_attribute(tx, b, "balance", 80i64)
    })
    .unwrap();
    p2.catch_up().unwrap();

    let before_b = p2.get_attribute(&mut reader, b, "balance").unwrap();
    assert_eq!((before_a, before_b), (Value::Int(50), Value::Int(50)));

    let mut fresh = p2.begin(true);
    let sum = p2.get_attribute(&mut fresh, a, "balance").unwrap().as_int().unwrap()
        + p2.get_attribute(&mut fresh, b, "balance").unwrap().as_int().unwrap();
    assert_eq!(sum, 100);
}

// ============================================================================
// Properties
// ============================================================================

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

    #[test]
    fn every_open_snapshot_keeps_its_value(
        writes in proptest::collection::vec((proptest::prelude::any::<bool>(), -1000i64..1000), 1..12),
    ) {
        let c = TestCluster::new();
        let processes = [c.process(), c.process()];
        let account = create_account(&processes[0], 0);

        let mut readers = Vec::new();
        for (on_second, value) in &writes {
            let db = &processes[usize::from(*on_second)];
            set_int(db, account, "balance", *value);
            let mut reader = db.begin(true);
            proptest::prop_assert_eq!(
                db.get_attribute(&mut reader, account, "balance").unwrap(),
                Value::Int(*value)
            );
            readers.push((usize::from(*on_second), reader, *value));
        }

        for (index, tx, expected) in readers.iter_mut() {
            let db = &processes[*index];
            proptest::prop_assert_eq!(
                db.get_attribute(tx, account, "balance").unwrap(),
                Value::Int(*expected)
            );
        }
        for (index, mut tx, _) in readers {
            processes[index].commit(&mut tx).unwrap();
        }
    }
}
