//! Pessimistic (lock-based) transactions
//!
//! Every write takes an exclusive lock on its key before it is buffered;
//! `get_for_update` takes a shared or exclusive lock before reading. Locks
//! are held until commit, rollback, expiry or drop.
//!
//! With a bound snapshot, a newly locked key is checked against the base
//! engine: a write committed after the snapshot fails the operation with
//! `ConflictAborted` and the transaction stays active.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_core::{
    ColumnFamilyId, KvCursor, OpKind, Storage, StrataError, StrataResult, TxnId, WriteOptions,
};
use tracing::{debug, error, warn};

use crate::lock::{LockManager, LockMode, LockRequest};
use crate::options::{LockTimeout, TransactionDbOptions, TransactionOptions};
use crate::snapshot::{ReadOptions, Snapshot};
use crate::transaction::{Transaction, TransactionStatus};
use crate::write_batch::WriteBatchWithIndex;

/// Shared handles a pessimistic transaction needs from its database
#[derive(Clone)]
pub struct PessimisticContext {
    /// Base engine
    pub storage: Arc<dyn Storage>,
    /// Lock table of the database
    pub locks: Arc<LockManager>,
    /// Database-wide transaction options
    pub db_options: TransactionDbOptions,
}

/// A lock-based transaction
pub struct PessimisticTransaction {
    id: TxnId,
    ctx: PessimisticContext,
    write_options: WriteOptions,
    options: TransactionOptions,
    status: TransactionStatus,
    batch: WriteBatchWithIndex,
    snapshot: Option<Arc<Snapshot>>,
    started: Instant,
    deadline: Option<Instant>,
}

impl PessimisticTransaction {
    /// Begin a transaction
    pub fn begin(
        id: TxnId,
        ctx: PessimisticContext,
        write_options: WriteOptions,
        options: TransactionOptions,
    ) -> Self {
        let batch =
            WriteBatchWithIndex::new(0, true).with_merge_operator(ctx.storage.merge_operator());
        let mut txn = PessimisticTransaction {
            id,
            ctx,
            write_options,
            options,
            status: TransactionStatus::Active,
            batch,
            snapshot: None,
            started: Instant::now(),
            deadline: None,
        };
        txn.start();
        txn
    }

    fn start(&mut self) {
        self.started = Instant::now();
        self.deadline = (self.options.expiration >= 0)
            .then(|| self.started + Duration::from_millis(self.options.expiration as u64));
        if self.options.set_snapshot {
            self.snapshot = Some(Snapshot::acquire(Arc::clone(&self.ctx.storage)));
        }
        debug!(target: "strata::txn", txn_id = self.id, "Began pessimistic transaction");
    }

    /// Reset a finished (or abandoned) transaction for reuse under a new id
    ///
    /// An active transaction is rolled back first.
    pub fn reinitialize(&mut self, id: TxnId, write_options: WriteOptions, options: TransactionOptions) {
        if self.status.is_active() {
            self.release();
        }
        self.id = id;
        self.write_options = write_options;
        self.options = options;
        self.status = TransactionStatus::Active;
        self.batch.clear();
        self.snapshot = None;
        self.start();
    }

    /// Whether this transaction was created by the database owning `locks`
    pub fn belongs_to(&self, locks: &Arc<LockManager>) -> bool {
        Arc::ptr_eq(&self.ctx.locks, locks)
    }

    /// Time since begin
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Options the transaction was started with
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Number of keys currently locked by this transaction
    pub fn num_locked_keys(&self) -> usize {
        self.ctx.locks.held_count(self.id)
    }

    fn release(&mut self) {
        self.ctx.locks.release_all(self.id);
        self.batch.clear();
        self.snapshot = None;
    }

    /// Lazy expiry: once past the deadline the transaction gives up its locks
    fn check_expired(&mut self) -> StrataResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                warn!(target: "strata::txn", txn_id = self.id, "Transaction expired");
                self.release();
                self.status = TransactionStatus::Expired;
                return Err(StrataError::TransactionExpired { txn_id: self.id });
            }
        }
        Ok(())
    }

    fn check_batch_limit(&self, kind: OpKind, key: &[u8], value: &[u8]) -> StrataResult<()> {
        let limit = self.options.max_write_batch_size;
        if limit > 0 && self.batch.projected_size(kind, key, value) > limit {
            return Err(StrataError::invalid_input(format!(
                "write batch would exceed max_write_batch_size of {limit} bytes"
            )));
        }
        Ok(())
    }

    /// Read `key` and lock it with an explicit timeout for this acquisition
    ///
    /// `timeout_ms` overrides both the transaction and database lock
    /// timeouts: `0` fails immediately on contention and a negative value
    /// waits without limit.
    pub fn get_for_update_with_timeout(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        exclusive: bool,
        timeout_ms: i64,
    ) -> StrataResult<Option<Vec<u8>>> {
        self.lock_key(cf, key, LockMode::for_update(exclusive), Some(timeout_ms))?;
        self.get_cf(read_options, cf, key)
    }

    fn lock_key(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        mode: LockMode,
        timeout_ms: Option<i64>,
    ) -> StrataResult<()> {
        self.status.ensure_active(self.id)?;
        self.check_expired()?;

        let previously_held = self.ctx.locks.is_held_by(self.id, cf, key, LockMode::Shared);
        let timeout = LockTimeout::resolve(
            timeout_ms,
            self.options.lock_timeout,
            self.ctx.db_options.transaction_lock_timeout,
        );
        self.ctx.locks.acquire(&LockRequest {
            txn_id: self.id,
            cf,
            key,
            mode,
            timeout,
            deadlock_detect: self.options.deadlock_detect,
            deadlock_detect_depth: self.options.deadlock_detect_depth,
        })?;

        if previously_held {
            return Ok(());
        }
        if let Some(snapshot) = &self.snapshot {
            let latest = self.ctx.storage.latest_sequence(cf, key);
            let conflict = match latest {
                Ok(Some(seq)) => seq > snapshot.sequence(),
                Ok(None) => false,
                Err(e) => {
                    self.ctx.locks.release(self.id, cf, key);
                    return Err(e);
                }
            };
            if conflict {
                self.ctx.locks.release(self.id, cf, key);
                debug!(target: "strata::txn", txn_id = self.id, %cf, "Key changed since snapshot");
                return Err(StrataError::ConflictAborted {
                    txn_id: self.id,
                    conflicts: 1,
                    cf,
                    key: key.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn buffer(&mut self, kind: OpKind, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.status.ensure_active(self.id)?;
        self.check_batch_limit(kind, key, value)?;
        self.lock_key(cf, key, LockMode::Exclusive, None)?;
        match kind {
            OpKind::Put => self.batch.put(cf, key, value),
            OpKind::Merge => self.batch.merge(cf, key, value),
            OpKind::Delete => self.batch.delete(cf, key),
        }
        Ok(())
    }
}

impl Transaction for PessimisticTransaction {
    fn id(&self) -> TxnId {
        self.id
    }

    fn status(&self) -> &TransactionStatus {
        &self.status
    }

    fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }

    fn write_batch(&self) -> &WriteBatchWithIndex {
        &self.batch
    }

    fn put_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.buffer(OpKind::Put, cf, key, value)
    }

    fn merge_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.buffer(OpKind::Merge, cf, key, value)
    }

    fn delete_cf(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<()> {
        self.buffer(OpKind::Delete, cf, key, &[])
    }

    fn get_cf(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<Vec<u8>>> {
        self.status.ensure_active(self.id)?;
        self.batch.get_from_batch_and_base(
            self.ctx.storage.as_ref(),
            read_options.read_sequence(),
            cf,
            key,
        )
    }

    fn get_for_update_cf(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        exclusive: bool,
    ) -> StrataResult<Option<Vec<u8>>> {
        self.lock_key(cf, key, LockMode::for_update(exclusive), None)?;
        self.get_cf(read_options, cf, key)
    }

    fn iterator_cf(&self, read_options: &ReadOptions, cf: ColumnFamilyId) -> StrataResult<KvCursor> {
        self.status.ensure_active(self.id)?;
        let base = self.ctx.storage.scan(cf, read_options.read_sequence())?;
        self.batch.iterator_with_base(cf, base)
    }

    fn commit(&mut self) -> StrataResult<()> {
        self.status.ensure_active(self.id)?;
        self.check_expired()?;

        match self
            .ctx
            .storage
            .write(self.batch.write_batch(), &self.write_options)
        {
            Ok(sequence) => {
                debug!(
                    target: "strata::txn",
                    txn_id = self.id,
                    count = self.batch.count(),
                    sequence,
                    "Committed pessimistic transaction"
                );
                self.release();
                self.status = TransactionStatus::Committed;
                Ok(())
            }
            Err(e) => {
                error!(target: "strata::txn", txn_id = self.id, error = %e, "Commit write failed");
                self.release();
                self.status = TransactionStatus::Aborted {
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> StrataResult<()> {
        match self.status {
            TransactionStatus::Active => {
                self.release();
                self.status = TransactionStatus::RolledBack;
                debug!(target: "strata::txn", txn_id = self.id, "Rolled back pessimistic transaction");
                Ok(())
            }
            TransactionStatus::Committed => Err(StrataError::invalid_handle(format!(
                "transaction {} already committed",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

impl Drop for PessimisticTransaction {
    fn drop(&mut self) {
        if self.status.is_active() {
            self.ctx.locks.release_all(self.id);
        }
    }
}

impl std::fmt::Debug for PessimisticTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PessimisticTransaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("batch", &self.batch)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::{Engine, EngineOptions};
    use tempfile::TempDir;

    struct Fixture {
        ctx: PessimisticContext,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("db"), EngineOptions::default()).unwrap();
        Fixture {
            ctx: PessimisticContext {
                storage: Arc::new(engine),
                locks: Arc::new(LockManager::new(16, None)),
                db_options: TransactionDbOptions::default(),
            },
            _dir: dir,
        }
    }

    fn begin(f: &Fixture, id: TxnId, options: TransactionOptions) -> PessimisticTransaction {
        PessimisticTransaction::begin(id, f.ctx.clone(), WriteOptions::default(), options)
    }

    fn latest(f: &Fixture, key: &[u8]) -> Option<Vec<u8>> {
        f.ctx.storage.get(ColumnFamilyId::DEFAULT, key, None).unwrap()
    }

    #[test]
    fn test_read_your_own_writes() {
        let f = fixture();
        let mut txn = begin(&f, 1, TransactionOptions::default());
        txn.put(b"k", b"v").unwrap();
        assert_eq!(txn.get(&ReadOptions::new(), b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(latest(&f, b"k"), None);

        txn.delete(b"k").unwrap();
        assert_eq!(txn.get(&ReadOptions::new(), b"k").unwrap(), None);
    }

    #[test]
    fn test_commit_applies_and_releases() {
        let f = fixture();
        let mut txn = begin(&f, 1, TransactionOptions::default());
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();
        assert_eq!(txn.num_locked_keys(), 2);

        txn.commit().unwrap();
        assert_eq!(txn.status(), &TransactionStatus::Committed);
        assert_eq!(f.ctx.locks.held_count(1), 0);
        assert_eq!(latest(&f, b"a"), Some(b"1".to_vec()));
        assert_eq!(latest(&f, b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_writes_conflict_on_lock() {
        let f = fixture();
        let mut holder = begin(&f, 1, TransactionOptions::default());
        holder.put(b"k", b"1").unwrap();

        let mut other = begin(
            &f,
            2,
            TransactionOptions {
                lock_timeout: 0,
                ..TransactionOptions::default()
            },
        );
        let err = other.put(b"k", b"2").unwrap_err();
        assert!(matches!(err, StrataError::LockTimeout { .. }));
        // Lock failures leave the transaction usable
        assert!(other.status().is_active());
        other.put(b"other", b"x").unwrap();
    }

    #[test]
    fn test_rollback_is_idempotent_and_invisible() {
        let f = fixture();
        let mut txn = begin(&f, 1, TransactionOptions::default());
        txn.put(b"k", b"v").unwrap();
        txn.rollback().unwrap();
        txn.rollback().unwrap();
        assert_eq!(latest(&f, b"k"), None);
        assert_eq!(f.ctx.locks.held_count(1), 0);
        assert!(matches!(
            txn.put(b"k", b"v"),
            Err(StrataError::InvalidHandleUse { .. })
        ));
    }

    #[test]
    fn test_rollback_after_commit_is_rejected() {
        let f = fixture();
        let mut txn = begin(&f, 1, TransactionOptions::default());
        txn.put(b"k", b"v").unwrap();
        txn.commit().unwrap();
        assert!(matches!(
            txn.rollback(),
            Err(StrataError::InvalidHandleUse { .. })
        ));
        assert!(matches!(
            txn.commit(),
            Err(StrataError::InvalidHandleUse { .. })
        ));
    }

    #[test]
    fn test_expiration() {
        let f = fixture();
        let mut txn = begin(
            &f,
            1,
            TransactionOptions {
                expiration: 10,
                ..TransactionOptions::default()
            },
        );
        txn.put(b"k", b"v").unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert!(matches!(
            txn.commit(),
            Err(StrataError::TransactionExpired { txn_id: 1 })
        ));
        assert_eq!(txn.status(), &TransactionStatus::Expired);
        assert_eq!(f.ctx.locks.held_count(1), 0);
        assert_eq!(latest(&f, b"k"), None);
        assert!(matches!(
            txn.put(b"k", b"v"),
            Err(StrataError::TransactionExpired { .. })
        ));
    }

    #[test]
    fn test_snapshot_validation_on_lock() {
        let f = fixture();
        let mut txn = begin(
            &f,
            1,
            TransactionOptions {
                set_snapshot: true,
                ..TransactionOptions::default()
            },
        );
        f.ctx
            .storage
            .write(
                &{
                    let mut b = strata_core::WriteBatch::new();
                    b.put(ColumnFamilyId::DEFAULT, b"k", b"outside");
                    b
                },
                &WriteOptions::default(),
            )
            .unwrap();

        let err = txn.put(b"k", b"inside").unwrap_err();
        assert!(matches!(err, StrataError::ConflictAborted { .. }));
        assert!(txn.status().is_active());
        assert_eq!(f.ctx.locks.held_count(1), 0);
        // Untouched keys are still writable
        txn.put(b"fresh", b"v").unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_get_for_update_shared_allows_other_readers() {
        let f = fixture();
        let mut a = begin(&f, 1, TransactionOptions::default());
        let mut b = begin(
            &f,
            2,
            TransactionOptions {
                lock_timeout: 0,
                ..TransactionOptions::default()
            },
        );
        let ro = ReadOptions::new();
        a.get_for_update_cf(&ro, ColumnFamilyId::DEFAULT, b"k", false)
            .unwrap();
        b.get_for_update_cf(&ro, ColumnFamilyId::DEFAULT, b"k", false)
            .unwrap();
        assert!(matches!(
            b.put(b"k", b"v"),
            Err(StrataError::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_per_acquire_timeout_overrides_transaction_timeout() {
        let f = fixture();
        let mut holder = begin(&f, 1, TransactionOptions::default());
        holder.put(b"k", b"v").unwrap();

        let mut waiter = begin(
            &f,
            2,
            TransactionOptions {
                lock_timeout: 10_000,
                ..TransactionOptions::default()
            },
        );
        let start = Instant::now();
        let err = waiter
            .get_for_update_with_timeout(&ReadOptions::new(), ColumnFamilyId::DEFAULT, b"k", true, 0)
            .unwrap_err();
        assert!(matches!(err, StrataError::LockTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(waiter.status().is_active());
        assert_eq!(waiter.num_locked_keys(), 0);
    }

    #[test]
    fn test_per_acquire_timeout_waits_for_release() {
        let f = fixture();
        let mut holder = begin(&f, 1, TransactionOptions::default());
        holder.put(b"k", b"v").unwrap();

        let mut waiter = begin(
            &f,
            2,
            TransactionOptions {
                lock_timeout: 0,
                ..TransactionOptions::default()
            },
        );
        let got = std::thread::scope(|s| {
            let handle = s.spawn(|| {
                waiter.get_for_update_with_timeout(
                    &ReadOptions::new(),
                    ColumnFamilyId::DEFAULT,
                    b"k",
                    false,
                    5_000,
                )
            });
            std::thread::sleep(Duration::from_millis(50));
            holder.commit().unwrap();
            handle.join().unwrap()
        });
        assert_eq!(got.unwrap(), Some(b"v".to_vec()));
        assert_eq!(waiter.num_locked_keys(), 1);
    }

    #[test]
    fn test_max_write_batch_size() {
        let f = fixture();
        let mut txn = begin(
            &f,
            1,
            TransactionOptions {
                max_write_batch_size: 40,
                ..TransactionOptions::default()
            },
        );
        txn.put(b"k", b"small").unwrap();
        let err = txn.put(b"k2", &[0u8; 64]).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
        assert_eq!(txn.write_batch().count(), 1);
    }

    #[test]
    fn test_iterator_merges_batch() {
        let f = fixture();
        let mut seed = begin(&f, 1, TransactionOptions::default());
        seed.put(b"a", b"base").unwrap();
        seed.put(b"c", b"base").unwrap();
        seed.commit().unwrap();

        let mut txn = begin(&f, 2, TransactionOptions::default());
        txn.put(b"b", b"mine").unwrap();
        txn.delete(b"c").unwrap();
        let entries = txn.iterator(&ReadOptions::new()).unwrap().into_vec();
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"base".to_vec()),
                (b"b".to_vec(), b"mine".to_vec()),
            ]
        );
    }

    #[test]
    fn test_drop_releases_locks() {
        let f = fixture();
        {
            let mut txn = begin(&f, 1, TransactionOptions::default());
            txn.put(b"k", b"v").unwrap();
        }
        assert_eq!(f.ctx.locks.held_count(1), 0);
        assert!(f.ctx.locks.holders(ColumnFamilyId::DEFAULT, b"k").is_empty());
    }

    #[test]
    fn test_reinitialize() {
        let f = fixture();
        let mut txn = begin(&f, 1, TransactionOptions::default());
        txn.put(b"k", b"v").unwrap();
        txn.commit().unwrap();

        txn.reinitialize(2, WriteOptions::default(), TransactionOptions::default());
        assert_eq!(txn.id(), 2);
        assert!(txn.status().is_active());
        assert!(txn.write_batch().is_empty());
        txn.put(b"k", b"w").unwrap();
        txn.commit().unwrap();
        assert_eq!(latest(&f, b"k"), Some(b"w".to_vec()));
    }
}
