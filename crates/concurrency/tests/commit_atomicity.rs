//! Commit atomicity tests
//!
//! A commit applies every buffered write or none of them, and concurrent
//! snapshot readers observe a commit as one indivisible point. Failure
//! injection wraps the real engine in a `Storage` that rejects writes on
//! demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use strata_concurrency::{
    LockManager, OptimisticTransaction, OptimisticTransactionOptions, PessimisticContext,
    PessimisticTransaction, ReadOptions, Snapshot, Transaction, TransactionDbOptions,
    TransactionOptions, TransactionStatus,
};
use strata_core::{
    ColumnFamilyId, MergeOperator, SequenceNumber, Storage, StrataError, StrataResult, WriteBatch,
    WriteOptions,
};
use strata_storage::{Engine, EngineOptions};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

/// Engine wrapper whose writes fail while `fail_writes` is set
struct FailingStorage {
    inner: Engine,
    fail_writes: AtomicBool,
}

impl Storage for FailingStorage {
    fn get(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
        read_seq: Option<SequenceNumber>,
    ) -> StrataResult<Option<Vec<u8>>> {
        self.inner.get(cf, key, read_seq)
    }

    fn latest_sequence(&self, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<Option<SequenceNumber>> {
        self.inner.latest_sequence(cf, key)
    }

    fn scan(
        &self,
        cf: ColumnFamilyId,
        read_seq: Option<SequenceNumber>,
    ) -> StrataResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(cf, read_seq)
    }

    fn write_with_precondition(
        &self,
        batch: &WriteBatch,
        options: &WriteOptions,
        precondition: &dyn Fn() -> StrataResult<()>,
    ) -> StrataResult<SequenceNumber> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.write_with_precondition(batch, options, precondition)
    }

    fn current_sequence(&self) -> SequenceNumber {
        self.inner.current_sequence()
    }

    fn acquire_snapshot(&self) -> SequenceNumber {
        self.inner.acquire_snapshot()
    }

    fn release_snapshot(&self, seq: SequenceNumber) {
        self.inner.release_snapshot(seq)
    }

    fn merge_operator(&self) -> Arc<dyn MergeOperator> {
        self.inner.merge_operator()
    }
}

fn failing_storage() -> (TempDir, Arc<FailingStorage>) {
    let dir = TempDir::new().unwrap();
    let inner = Engine::open(dir.path().join("db"), EngineOptions::default()).unwrap();
    (
        dir,
        Arc::new(FailingStorage {
            inner,
            fail_writes: AtomicBool::new(false),
        }),
    )
}

fn context(storage: Arc<dyn Storage>) -> PessimisticContext {
    PessimisticContext {
        storage,
        locks: Arc::new(LockManager::new(16, None)),
        db_options: TransactionDbOptions::default(),
    }
}

const CF: ColumnFamilyId = ColumnFamilyId::DEFAULT;

// ============================================================================
// SECTION 1: Failure Injection
// ============================================================================

mod failure_injection {
    use super::*;

    #[test]
    fn test_pessimistic_commit_failure_applies_nothing() {
        let (_dir, storage) = failing_storage();
        let ctx = context(storage.clone());
        let mut txn = PessimisticTransaction::begin(
            1,
            ctx.clone(),
            WriteOptions::default(),
            TransactionOptions::default(),
        );
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        let err = txn.commit().unwrap_err();
        assert!(err.is_storage_error());
        assert!(matches!(txn.status(), TransactionStatus::Aborted { .. }));

        storage.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(storage.get(CF, b"a", None).unwrap(), None);
        assert_eq!(storage.get(CF, b"b", None).unwrap(), None);
        assert_eq!(ctx.locks.held_count(1), 0);

        // Aborted transactions are terminal
        assert!(matches!(
            txn.put(b"a", b"again"),
            Err(StrataError::InvalidHandleUse { .. })
        ));
    }

    #[test]
    fn test_optimistic_commit_failure_applies_nothing() {
        let (_dir, storage) = failing_storage();
        let shared: Arc<dyn Storage> = storage.clone();
        let mut txn = OptimisticTransaction::begin(
            1,
            shared,
            WriteOptions::default(),
            OptimisticTransactionOptions::default(),
        );
        txn.put(b"a", b"1").unwrap();
        txn.delete(b"b").unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        assert!(txn.commit().is_err());
        assert!(matches!(txn.status(), TransactionStatus::Aborted { .. }));
        assert_eq!(storage.get(CF, b"a", None).unwrap(), None);
    }

    #[test]
    fn test_locks_are_reusable_after_failed_commit() {
        let (_dir, storage) = failing_storage();
        let ctx = context(storage.clone());
        let mut failed = PessimisticTransaction::begin(
            1,
            ctx.clone(),
            WriteOptions::default(),
            TransactionOptions::default(),
        );
        failed.put(b"k", b"lost").unwrap();
        storage.fail_writes.store(true, Ordering::SeqCst);
        assert!(failed.commit().is_err());
        storage.fail_writes.store(false, Ordering::SeqCst);

        let mut next = PessimisticTransaction::begin(
            2,
            ctx,
            WriteOptions::default(),
            TransactionOptions {
                lock_timeout: 0,
                ..TransactionOptions::default()
            },
        );
        next.put(b"k", b"kept").unwrap();
        next.commit().unwrap();
        assert_eq!(storage.get(CF, b"k", None).unwrap(), Some(b"kept".to_vec()));
    }
}

// ============================================================================
// SECTION 2: Atomic Visibility
// ============================================================================

mod atomic_visibility {
    use super::*;

    #[test]
    fn test_snapshot_readers_never_see_partial_commits() {
        let (_dir, storage) = failing_storage();
        let shared: Arc<dyn Storage> = storage.clone();
        let ctx = context(Arc::clone(&shared));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let ctx = ctx.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..200u64 {
                    let mut txn = PessimisticTransaction::begin(
                        i + 1,
                        ctx.clone(),
                        WriteOptions::default(),
                        TransactionOptions::default(),
                    );
                    let value = i.to_string();
                    txn.put(b"left", value.as_bytes()).unwrap();
                    txn.put(b"right", value.as_bytes()).unwrap();
                    txn.commit().unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut observed = 0usize;
        while !done.load(Ordering::SeqCst) || observed == 0 {
            let snapshot = Snapshot::acquire(Arc::clone(&shared));
            let read = ReadOptions::at(&snapshot);
            let left = shared.get(CF, b"left", read.read_sequence()).unwrap();
            let right = shared.get(CF, b"right", read.read_sequence()).unwrap();
            assert_eq!(left, right);
            observed += 1;
        }
        writer.join().unwrap();
        assert_eq!(storage.inner.live_snapshot_count(), 0);
    }
}
