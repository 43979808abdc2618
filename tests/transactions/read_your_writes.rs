//! Read-Your-Own-Writes Tests
//!
//! A transaction sees its buffered writes layered over the base engine;
//! nobody else does until commit.

use crate::common::*;

// ============================================================================
// Point Reads
// ============================================================================

#[test]
fn pessimistic_reads_own_put_merge_and_delete() {
    let dir = TestDir::new();
    let db = dir.open_pessimistic();
    db.put(&wo(), b"counter", b"a").unwrap();
    db.put(&wo(), b"doomed", b"x").unwrap();

    let mut txn = db
        .begin_transaction(wo(), TransactionOptions::default(), None)
        .unwrap();
    let ro = ReadOptions::new();
    txn.merge(b"counter", b"b").unwrap();
    txn.merge(b"counter", b"c").unwrap();
    txn.delete(b"doomed").unwrap();
    txn.put(b"fresh", b"1").unwrap();

    assert_eq!(txn.get(&ro, b"counter").unwrap(), Some(b"abc".to_vec()));
    assert_eq!(txn.get(&ro, b"doomed").unwrap(), None);
    assert_eq!(txn.get(&ro, b"fresh").unwrap(), Some(b"1".to_vec()));

    assert_eq!(latest(&db, b"counter"), Some(b"a".to_vec()));
    assert_eq!(latest(&db, b"doomed"), Some(b"x".to_vec()));

    txn.commit().unwrap();
    assert_eq!(latest(&db, b"counter"), Some(b"abc".to_vec()));
    assert_eq!(latest(&db, b"doomed"), None);
    assert_eq!(latest(&db, b"fresh"), Some(b"1".to_vec()));
}

#[test]
fn optimistic_reads_own_writes() {
    let dir = TestDir::new();
    let db = dir.open_optimistic();
    db.put(&wo(), b"k", b"base").unwrap();

    let mut txn = db
        .begin_transaction(wo(), OptimisticTransactionOptions::default(), None)
        .unwrap();
    txn.put(b"k", b"mine").unwrap();
    assert_eq!(txn.get(&ReadOptions::new(), b"k").unwrap(), Some(b"mine".to_vec()));
    assert_eq!(latest(&db, b"k"), Some(b"base".to_vec()));

    txn.rollback().unwrap();
    assert_eq!(txn.status(), &TransactionStatus::RolledBack);
    assert_eq!(latest(&db, b"k"), Some(b"base".to_vec()));
}

// ============================================================================
// Iteration
// ============================================================================

#[test]
fn iterator_merges_batch_over_base() {
    let dir = TestDir::new();
    let db = dir.open_pessimistic();
    for (k, v) in [(b"a", b"1"), (b"c", b"3"), (b"e", b"5")] {
        db.put(&wo(), k, v).unwrap();
    }

    let mut txn = db
        .begin_transaction(wo(), TransactionOptions::default(), None)
        .unwrap();
    txn.put(b"b", b"2").unwrap();
    txn.put(b"c", b"33").unwrap();
    txn.delete(b"e").unwrap();

    let entries = collect(txn.iterator(&ReadOptions::new()).unwrap());
    assert_eq!(
        entries,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"33".to_vec()),
        ]
    );
}

#[test]
fn operations_after_commit_are_rejected() {
    let dir = TestDir::new();
    let db = dir.open_pessimistic();
    let mut txn = db
        .begin_transaction(wo(), TransactionOptions::default(), None)
        .unwrap();
    txn.put(b"k", b"v").unwrap();
    txn.commit().unwrap();

    assert!(matches!(
        txn.put(b"k", b"again"),
        Err(StrataError::InvalidHandleUse { .. })
    ));
    assert!(matches!(
        txn.get(&ReadOptions::new(), b"k"),
        Err(StrataError::InvalidHandleUse { .. })
    ));
    assert!(matches!(
        txn.rollback(),
        Err(StrataError::InvalidHandleUse { .. })
    ));
}
