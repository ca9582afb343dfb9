//! Commit Listener Tests

use crate::common::*;
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(CommitNumber, usize, usize)>>,
}

impl CommitListener for Recorder {
    fn after_commit(&self, tx: &TxIntrospector<'_>) {
        if let Some(number) = tx.commit_number() {
            self.seen
                .lock()
                .push((number, tx.new_objects().len(), tx.write_log().count()));
        }
    }
}

struct RejectNegative;

impl CommitListener for RejectNegative {
    fn before_commit(&self, tx: &TxIntrospector<'_>) -> Result<()> {
        for (slot, value) in tx.write_log() {
            if value.as_int().map_or(false, |v| v < 0) {
                return Err(Error::InvalidState(format!("{} would go negative", slot)));
            }
        }
        Ok(())
    }
}

#[test]
fn after_commit_sees_write_set() {
    let c = TestCluster::new();
    let db = c.process();
    let recorder = Arc::new(Recorder::default());
    let id = db.register_commit_listener(recorder.clone());

    let account = create_account(&db, 3);
    set_int(&db, account, "balance", 4);
    assert_eq!(
        *recorder.seen.lock(),
        vec![(CommitNumber::new(2), 1, 1), (CommitNumber::new(3), 0, 1)]
    );

    assert!(db.remove_commit_listener(id));
    set_int(&db, account, "balance", 5);
    assert_eq!(recorder.seen.lock().len(), 2);
}

#[test]
fn before_commit_can_veto() {
    let c = TestCluster::new();
    let db = c.process();
    db.register_commit_listener(Arc::new(RejectNegative));
    let account = create_account(&db, 3);
    let before = db.current_commit_number();

    let mut tx = db.begin(false);
    db.set_attribute(&mut tx, account, "balance", -1i64).unwrap();
    assert!(matches!(db.commit(&mut tx), Err(Error::InvalidState(_))));
    assert!(tx.is_aborted());
    assert_eq!(db.current_commit_number(), before);
    assert_eq!(get(&db, account, "balance"), Value::Int(3));
}
