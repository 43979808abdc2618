//! Shared Engine Tests
//!
//! Both database flavors sit on the same on-disk format, and one directory
//! can be open by only one handle at a time.

use crate::common::*;

#[test]
fn directory_written_by_one_flavor_opens_as_the_other() {
    let dir = TestDir::new();
    {
        let db = dir.open_pessimistic();
        let cf = db.create_column_family("events").unwrap();
        db.put_cf(&wo(), cf, b"e1", b"start").unwrap();
    }

    let db = dir.open_optimistic();
    let cf = db.column_family("events").unwrap();
    let mut txn = db
        .begin_transaction(wo(), OptimisticTransactionOptions::default(), None)
        .unwrap();
    assert_eq!(
        txn.get_cf(&ReadOptions::new(), cf, b"e1").unwrap(),
        Some(b"start".to_vec())
    );
    txn.put_cf(cf, b"e2", b"stop").unwrap();
    txn.commit().unwrap();
    assert_eq!(db.scan_cf(&ReadOptions::new(), cf).unwrap().len(), 2);
}

#[test]
fn second_open_of_a_live_directory_fails() {
    let dir = TestDir::new();
    let _db = dir.open_pessimistic();
    let err = OptimisticTransactionDb::open(dir.db_path(), DbConfig::default()).unwrap_err();
    assert!(err.is_storage_error());
}

#[test]
fn snapshot_from_handle_pins_reads() {
    let dir = TestDir::new();
    let db = dir.open_pessimistic();
    db.put(&wo(), b"k", b"v1").unwrap();
    let snapshot = db.snapshot();
    db.put(&wo(), b"k", b"v2").unwrap();

    let ro = ReadOptions::at(&snapshot);
    assert_eq!(db.get(&ro, b"k").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(db.engine().live_snapshot_count(), 1);
    drop(ro);
    drop(snapshot);
    assert_eq!(db.engine().live_snapshot_count(), 0);
}

#[test]
fn custom_config_round_trips_through_directory() {
    let dir = TestDir::new();
    let mut config = DbConfig::default();
    config.transaction_db.num_stripes = 4;
    config.transaction_db.default_lock_timeout = 0;
    {
        let db = TransactionDb::open(dir.db_path(), config.clone()).unwrap();
        assert_eq!(db.lock_manager().num_stripes(), 4);
    }
    let persisted = DbConfig::from_file(&dir.db_path().join(strata_txndb::CONFIG_FILE_NAME)).unwrap();
    assert_eq!(persisted, config);
}
