//! Push Replication Tests
//!
//! Processes apply commit broadcasts and query the change log only to
//! bridge gaps.

use crate::common::*;
use versadb::core::{AttributeWrite, ChangeLogRow, ChangeSet, CommitMessage};

fn push_process(c: &TestCluster) -> Database {
    c.process_with(ReplicationMode::Push, schemas())
}

/// Persist a balance write as a peer that is not an engine under test
fn peer_commit(c: &TestCluster, number: u32, oid: Oid, balance: i64, create: bool) -> CommitMessage {
    let number = CommitNumber::new(number);
    let rows = vec![ChangeLogRow::new(oid, "balance", number)];
    let change_set = ChangeSet {
        commit_number: number,
        server_id: ServerId::new(9),
        attributes: vec![AttributeWrite {
            oid,
            attribute: "balance".to_string(),
            value: Value::Int(balance),
        }],
        new_objects: if create { vec![oid] } else { vec![] },
        deleted_objects: vec![],
        relations: vec![],
        rows: rows.clone(),
    };
    c.backend.persist_change_set(&change_set).unwrap();
    CommitMessage::from_rows(ServerId::new(9), number, &rows)
}

#[test]
fn broadcast_commit_applied_by_peer() {
    let c = TestCluster::new();
    let p1 = push_process(&c);
    let p2 = push_process(&c);

    let account = create_account(&p1, 12);
    assert_eq!(c.cluster.published(), 2);

    assert_eq!(p2.catch_up().unwrap(), p1.current_commit_number());
    assert_eq!(get(&p2, account, "balance"), Value::Int(12));
}

#[test]
fn out_of_order_and_duplicate_broadcasts_apply_once() {
    let c = TestCluster::new();
    let db = push_process(&c);
    let account = Oid::new(ClassId::new(1), c.backend.next_internal_id(ClassId::new(1)).unwrap());

    let second = peer_commit(&c, 2, account, 10, true);
    let third = peer_commit(&c, 3, account, 11, false);
    c.cluster.publish(third.clone()).unwrap();
    c.cluster.publish(second.clone()).unwrap();
    c.cluster.publish(third).unwrap();

    assert_eq!(db.catch_up().unwrap(), CommitNumber::new(3));
    assert_eq!(db.metrics().aliens_replayed, 2);
    assert_eq!(get(&db, account, "balance"), Value::Int(11));

    // A late duplicate is ignored
    c.cluster.publish(second).unwrap();
    assert_eq!(db.catch_up().unwrap(), CommitNumber::new(3));
    assert_eq!(db.metrics().aliens_replayed, 2);
}

#[test]
fn lost_broadcast_is_bridged_from_change_log() {
    let c = TestCluster::new();
    let p1 = push_process(&c);
    let p2 = push_process(&c);

    c.cluster.set_delivery(false);
    let first = create_account(&p1, 1);
    c.cluster.set_delivery(true);
    let second = create_account(&p1, 2);

    assert_eq!(p2.catch_up().unwrap(), CommitNumber::new(3));
    assert_eq!(get(&p2, first, "balance"), Value::Int(1));
    assert_eq!(get(&p2, second, "balance"), Value::Int(2));
}

#[test]
fn commit_polls_when_store_is_ahead_of_broadcasts() {
    let c = TestCluster::new();
    let p1 = push_process(&c);
    let p2 = push_process(&c);
    let account = create_account(&p1, 5);
    p2.catch_up().unwrap();

    // p1 persists without announcing
    c.cluster.set_delivery(false);
    set_int(&p1, account, "balance", 6);
    c.cluster.set_delivery(true);

    let mut tx = p2.begin(false);
    p2.set_attribute(&mut tx, account, "owner", "carol").unwrap();
    assert_eq!(p2.commit(&mut tx).unwrap(), Some(CommitNumber::new(4)));
    assert_eq!(get(&p2, account, "balance"), Value::Int(6));
}

#[test]
fn read_after_silent_peer_commit_conflicts() {
    let c = TestCluster::new();
    let p1 = push_process(&c);
    let p2 = push_process(&c);
    let account = create_account(&p1, 5);
    p2.catch_up().unwrap();

    let mut tx = p2.begin(false);
    let balance = p2.get_attribute(&mut tx, account, "balance").unwrap();

    c.cluster.set_delivery(false);
    set_int(&p1, account, "balance", 50);
    c.cluster.set_delivery(true);

    p2.set_attribute(&mut tx, account, "balance", balance.as_int().unwrap() + 1)
        .unwrap();
    assert!(p2.commit(&mut tx).unwrap_err().is_conflict());
}

#[test]
fn dropping_a_process_unsubscribes() {
    let c = TestCluster::new();
    let p1 = push_process(&c);
    let p2 = push_process(&c);
    assert_eq!(c.cluster.subscriber_count(), 2);

    drop(p2);
    assert_eq!(c.cluster.subscriber_count(), 1);
    create_account(&p1, 1);
}
