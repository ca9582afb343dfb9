//! Commit Conflict Tests
//!
//! Optimistic validation: a commit fails when something it read changed
//! after its snapshot, and succeeds otherwise.

use crate::common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Barrier;
use std::thread;

#[test]
fn disjoint_writers_both_commit() {
    let c = TestCluster::new();
    let db = c.process();
    let a = create_account(&db, 1);
    let b = create_account(&db, 2);

    let mut t1 = db.begin(false);
    let mut t2 = db.begin(false);
    assert_eq!(db.get_attribute(&mut t1, a, "balance").unwrap(), Value::Int(1));
    assert_eq!(db.get_attribute(&mut t2, b, "balance").unwrap(), Value::Int(2));
    db.set_attribute(&mut t1, a, "balance", 10i64).unwrap();
    db.set_attribute(&mut t2, b, "balance", 20i64).unwrap();

    let n1 = db.commit(&mut t1).unwrap().unwrap();
    let n2 = db.commit(&mut t2).unwrap().unwrap();
    assert!(n2 > n1);
    assert_eq!(get(&db, a, "balance"), Value::Int(10));
    assert_eq!(get(&db, b, "balance"), Value::Int(20));
}

#[test]
fn read_write_overlap_conflicts_across_processes() {
    let c = TestCluster::new();
    let p1 = c.process();
    let p2 = c.process();
    let (x, y) = p1
        .with_transaction(false, |db, tx| {
            let x = db.create_object(tx, "Account")?;
            let y = db.create_object(tx, "Account")?;
            db.set_attribute(tx, x, "balance", 1i64)?;
            db.set_attribute(tx, y, "balance", 1i64)?;
            Ok((x, y))
        })
        .unwrap();

    // A reads x and writes only y
    let mut a = p1.begin(false);
    let seen = p1.get_attribute(&mut a, x, "balance").unwrap();
    p1.set_attribute(&mut a, y, "balance", seen.as_int().unwrap() + 1)
        .unwrap();

    // B reads and writes x on the other process and commits first
    let mut b = p2.begin(false);
    p2.get_attribute(&mut b, x, "balance").unwrap();
    p2.set_attribute(&mut b, x, "balance", 5i64).unwrap();
    p2.commit(&mut b).unwrap();

    let err = p1.commit(&mut a).unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {}", err);
    assert!(a.is_aborted());
    assert_eq!(p1.metrics().conflicts, 1);

    assert_eq!(get(&p1, x, "balance"), Value::Int(5));
    assert_eq!(get(&p1, y, "balance"), Value::Int(1));
}

#[test]
fn blind_write_does_not_conflict() {
    let c = TestCluster::new();
    let db = c.process();
    let x = create_account(&db, 1);

    let mut blind = db.begin(false);
    db.set_attribute(&mut blind, x, "owner", "bob").unwrap();

    set_int(&db, x, "balance", 2);
    assert!(db.commit(&mut blind).unwrap().is_some());
    assert_eq!(get(&db, x, "owner"), Value::from("bob"));
    assert_eq!(get(&db, x, "balance"), Value::Int(2));
}

#[test]
fn aborted_transaction_leaves_no_trace() {
    let c = TestCluster::new();
    let db = c.process();
    let x = create_account(&db, 7);
    let before = c.backend.max_commit_number().unwrap();

    let mut tx = db.begin(false);
    db.set_attribute(&mut tx, x, "balance", 8i64).unwrap();
    db.abort(&mut tx).unwrap();

    assert_eq!(c.backend.max_commit_number().unwrap(), before);
    assert_eq!(get(&db, x, "balance"), Value::Int(7));
    assert!(matches!(db.commit(&mut tx), Err(Error::InvalidState(_))));
}

#[test]
fn concurrent_increments_serialize() {
    const THREADS: usize = 8;
    const INCREMENTS: i64 = 20;

    let c = TestCluster::new();
    let db = Arc::new(
        Database::builder()
            .backend(c.backend.clone())
            .cluster(c.cluster.clone())
            .classes(schemas())
            .max_commit_retries(10_000)
            .open()
            .unwrap(),
    );
    let counter = create_account(&db, 0);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..INCREMENTS {
                    db.with_transaction(false, |db, tx| {
                        let current = db.get_attribute(tx, counter, "balance")?;
                        db.set_attribute(tx, counter, "balance", current.as_int().unwrap_or(0) + 1)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(get(&db, counter, "balance"), Value::Int(THREADS as i64 * INCREMENTS));
    let metrics = db.metrics();
    assert_eq!(metrics.write_commits as usize, 2 + THREADS * INCREMENTS as usize);
}

#[test]
fn concurrent_processes_never_reuse_commit_numbers() {
    const PROCESSES: usize = 4;
    const COMMITS: usize = 15;

    let c = TestCluster::new();
    let processes: Vec<Arc<Database>> = (0..PROCESSES).map(|_| Arc::new(c.process())).collect();
    let barrier = Arc::new(Barrier::new(PROCESSES));

    let handles: Vec<_> = processes
        .iter()
        .map(|db| {
            let db = Arc::clone(db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..COMMITS)
                    .map(|i| create_account(&db, i as i64))
                    .count()
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(total, PROCESSES * COMMITS);
    let rows = c
        .backend
        .query_change_log_since(CommitNumber::ZERO, RowLock::Shared)
        .unwrap();
    let mut numbers: Vec<CommitNumber> = rows.iter().map(|row| row.commit_number).collect();
    numbers.dedup();
    assert_eq!(numbers.len(), 1 + PROCESSES * COMMITS);
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn random_transfers_preserve_total_balance() {
    const PROCESSES: usize = 3;
    const ACCOUNTS: usize = 6;
    const TRANSFERS: usize = 40;
    const OPENING: i64 = 100;

    let c = TestCluster::new();
    let processes: Vec<Arc<Database>> = (0..PROCESSES)
        .map(|_| {
            Arc::new(
                Database::builder()
                    .backend(c.backend.clone())
                    .cluster(c.cluster.clone())
                    .classes(schemas())
                    .max_commit_retries(10_000)
                    .open()
                    .unwrap(),
            )
        })
        .collect();
    let accounts: Arc<Vec<Oid>> = Arc::new(
        (0..ACCOUNTS)
            .map(|_| create_account(&processes[0], OPENING))
            .collect(),
    );
    let barrier = Arc::new(Barrier::new(PROCESSES));

    let handles: Vec<_> = processes
        .iter()
        .enumerate()
        .map(|(seed, db)| {
            let db = Arc::clone(db);
            let accounts = Arc::clone(&accounts);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                barrier.wait();
                for _ in 0..TRANSFERS {
                    let from = accounts[rng.gen_range(0..ACCOUNTS)];
                    let to = accounts[rng.gen_range(0..ACCOUNTS)];
                    let amount: i64 = rng.gen_range(1..=10);
                    db.with_transaction(false, |db, tx| {
                        let a = db.get_attribute(tx, from, "balance")?.as_int().unwrap_or(0);
                        db.set_attribute(tx, from, "balance", a - amount)?;
                        let b = db.get_attribute(tx, to, "balance")?.as_int().unwrap_or(0);
                        db.set_attribute(tx, to, "balance", b + amount)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for db in &processes {
        db.catch_up().unwrap();
        let total: i64 = db
            .with_transaction(true, |db, tx| {
                let mut sum = 0;
                for oid in accounts.iter() {
                    sum += db.get_attribute(tx, *oid, "balance")?.as_int().unwrap_or(0);
                }
                Ok(sum)
            })
            .unwrap();
        assert_eq!(total, OPENING * ACCOUNTS as i64);
    }
}
