//! Recovery Tests
//!
//! Committed transactions survive close and reopen, through the WAL alone
//! and through flushed table files.

use crate::common::*;

#[test]
fn committed_transactions_survive_reopen() {
    let dir = TestDir::new();
    {
        let db = dir.open_pessimistic();
        let mut txn = db
            .begin_transaction(WriteOptions { sync: true, ..wo() }, TransactionOptions::default(), None)
            .unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();
        txn.commit().unwrap();

        let mut abandoned = db
            .begin_transaction(wo(), TransactionOptions::default(), None)
            .unwrap();
        abandoned.put(b"c", b"3").unwrap();
    }

    let db = dir.open_pessimistic();
    assert_eq!(latest(&db, b"a"), Some(b"1".to_vec()));
    assert_eq!(latest(&db, b"b"), Some(b"2".to_vec()));
    assert_eq!(latest(&db, b"c"), None);
}

#[test]
fn flushed_and_logged_writes_combine_on_reopen() {
    let dir = TestDir::new();
    {
        let db = dir.open_optimistic();
        db.put(&wo(), b"flushed", b"old").unwrap();
        db.flush().unwrap();
        db.put(&wo(), b"flushed", b"new").unwrap();
        db.put(&wo(), b"logged", b"1").unwrap();
    }

    let db = dir.open_optimistic();
    assert_eq!(latest(&db, b"flushed"), Some(b"new".to_vec()));
    assert_eq!(latest(&db, b"logged"), Some(b"1".to_vec()));
}

#[test]
fn sequence_resumes_after_reopen() {
    let dir = TestDir::new();
    let before = {
        let db = dir.open_pessimistic();
        db.put(&wo(), b"k", b"v").unwrap();
        db.engine().current_sequence()
    };

    let db = dir.open_pessimistic();
    assert_eq!(db.engine().current_sequence(), before);
    db.put(&wo(), b"k", b"v2").unwrap();
    assert!(db.engine().current_sequence() > before);
}
