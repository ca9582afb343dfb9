//! Change-Log Cleaner Tests

use crate::common::*;

fn log_numbers(c: &TestCluster) -> Vec<CommitNumber> {
    let mut numbers: Vec<CommitNumber> = c
        .backend
        .query_change_log_since(CommitNumber::ZERO, RowLock::Shared)
        .unwrap()
        .into_iter()
        .map(|row| row.commit_number)
        .collect();
    numbers.dedup();
    numbers
}

#[test]
fn lagging_server_holds_back_pruning() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();

    let account = create_account(&p1, 1);
    set_int(&p1, account, "balance", 2);
    set_int(&p1, account, "balance", 3);
    assert_eq!(p1.current_commit_number(), CommitNumber::new(4));

    // p2 recorded progress 1 when it opened
    assert_eq!(p1.prune_change_log().unwrap(), 0);
    assert_eq!(log_numbers(&c).len(), 4);

    p2.catch_up().unwrap();
    assert_eq!(p2.prune_change_log().unwrap(), 3);
    assert_eq!(log_numbers(&c), vec![CommitNumber::new(4)]);

    // Values stay readable through attribute history
    assert_eq!(get(&p2, account, "balance"), Value::Int(3));
    set_int(&p2, account, "balance", 4);
    assert_eq!(get(&p1, account, "balance"), Value::Int(4));
}

#[test]
fn shut_down_server_no_longer_holds_back_pruning() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();

    let account = create_account(&p1, 1);
    set_int(&p1, account, "balance", 2);
    set_int(&p1, account, "balance", 3);
    assert_eq!(p1.prune_change_log().unwrap(), 0);

    p2.shutdown().unwrap();
    assert_eq!(c.backend.min_server_progress().unwrap(), Some(CommitNumber::new(4)));
    assert_eq!(p1.prune_change_log().unwrap(), 3);
    assert_eq!(log_numbers(&c), vec![CommitNumber::new(4)]);
}

#[test]
fn process_opened_after_pruning_starts_at_durable_max() {
    let c = TestCluster::new();
    let p1 = c.process();
    let account = create_account(&p1, 1);
    set_int(&p1, account, "balance", 2);
    p1.prune_change_log().unwrap();
    assert_eq!(log_numbers(&c), vec![CommitNumber::new(3)]);

    let p2 = c.process();
    assert_eq!(p2.current_commit_number(), CommitNumber::new(3));
    assert_eq!(get(&p2, account, "balance"), Value::Int(2));
}

#[test]
fn background_cleaner_runs_when_configured() {
    let c = TestCluster::new();
    let db = Database::builder()
        .backend(c.backend.clone())
        .cluster(c.cluster.clone())
        .classes(schemas())
        .cleaner_interval_secs(1)
        .open()
        .unwrap();
    assert!(format!("{:?}", db).contains("closed: false"));
    db.shutdown().unwrap();
    assert!(db.is_closed());
}
