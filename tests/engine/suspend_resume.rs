//! Suspend / Resume Tests
//!
//! A suspended transaction is revalidated on resume against whatever the
//! timeline reached in the meantime.

use crate::common::*;

/// Two processes, two accounts, and p1's timeline at commit 20
fn at_commit_20(c: &TestCluster) -> (Database, Database, Oid, Oid) {
    let p1 = c.process();
    let p2 = c.process();
    let (x, y) = p1
        .with_transaction(false, |db, tx| {
            let x = db.create_object(tx, "Account")?;
            let y = db.create_object(tx, "Account")?;
            db.set_attribute(tx, x, "balance", 0i64)?;
            db.set_attribute(tx, y, "balance", 0i64)?;
            Ok((x, y))
        })
        .unwrap();
    let mut filler = CommitNumber::ZERO;
    for i in 0..18 {
        filler = set_int(&p1, y, "owner", i);
    }
    assert_eq!(filler, CommitNumber::new(20));
    (p1, p2, x, y)
}

#[test]
fn resume_after_alien_commit_on_read_box_is_invalid() {
    let c = TestCluster::new();
    let (p1, p2, x, y) = at_commit_20(&c);

    let mut tx = p2.begin(false);
    assert_eq!(p2.get_attribute(&mut tx, x, "balance").unwrap(), Value::Int(0));
    p2.set_attribute(&mut tx, y, "balance", 1i64).unwrap();
    assert_eq!(tx.snapshot(), CommitNumber::new(20));
    p2.suspend(&mut tx).unwrap();
    assert!(tx.is_suspended());

    for i in 0..4 {
        set_int(&p1, y, "owner", 100 + i);
    }
    assert_eq!(set_int(&p1, x, "balance", 9), CommitNumber::new(25));

    match p2.resume(&mut tx) {
        Err(Error::ResumeInvalid { snapshot, latest }) => {
            assert_eq!(snapshot, CommitNumber::new(20));
            assert_eq!(latest, CommitNumber::new(25));
        }
        other => panic!("expected ResumeInvalid, got {:?}", other),
    }
    assert!(tx.is_aborted());
    assert_eq!(p2.metrics().resume_failures, 1);
    assert_eq!(c.backend.max_commit_number().unwrap(), CommitNumber::new(25));
}

#[test]
fn resume_after_unrelated_alien_commits_succeeds() {
    let c = TestCluster::new();
    let (p1, p2, x, y) = at_commit_20(&c);

    let mut tx = p2.begin(false);
    p2.get_attribute(&mut tx, x, "balance").unwrap();
    p2.set_attribute(&mut tx, x, "balance", 7i64).unwrap();
    p2.suspend(&mut tx).unwrap();

    for i in 0..5 {
        set_int(&p1, y, "owner", i);
    }

    p2.resume(&mut tx).unwrap();
    assert_eq!(tx.snapshot(), CommitNumber::new(25));
    assert_eq!(p2.commit(&mut tx).unwrap(), Some(CommitNumber::new(26)));
    assert_eq!(get(&p1, x, "balance"), Value::Int(7));
}

#[test]
fn read_only_resume_keeps_snapshot() {
    let c = TestCluster::new();
    let (p1, p2, x, _y) = at_commit_20(&c);

    let mut tx = p2.begin(true);
    assert_eq!(p2.get_attribute(&mut tx, x, "balance").unwrap(), Value::Int(0));
    p2.suspend(&mut tx).unwrap();
    set_int(&p1, x, "balance", 3);
    p2.resume(&mut tx).unwrap();

    assert_eq!(tx.snapshot(), CommitNumber::new(20));
    assert_eq!(p2.get_attribute(&mut tx, x, "balance").unwrap(), Value::Int(0));
    assert_eq!(p2.commit(&mut tx).unwrap(), None);
}

#[test]
fn suspended_transaction_rejects_operations() {
    let c = TestCluster::new();
    let db = c.process();
    let x = create_account(&db, 1);

    let mut tx = db.begin(false);
    db.suspend(&mut tx).unwrap();
    assert!(matches!(
        db.get_attribute(&mut tx, x, "balance"),
        Err(Error::InvalidState(_))
    ));
    assert!(db.commit(&mut tx).is_err());
    assert!(matches!(db.suspend(&mut tx), Err(Error::InvalidState(_))));

    db.resume(&mut tx).unwrap();
    assert_eq!(db.get_attribute(&mut tx, x, "balance").unwrap(), Value::Int(1));
}
