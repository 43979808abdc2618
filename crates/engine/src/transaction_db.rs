//! Pessimistic transaction database
//!
//! Every transaction locks the keys it writes in the shared lock table.
//! Writes issued directly on the database go through the same lock table
//! under an internal transaction id, so they wait for (and are waited on
//! by) transactions holding the same keys.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_concurrency::{
    LockManager, LockMode, LockRequest, LockTimeout, PessimisticContext, PessimisticTransaction,
    TransactionDbOptions, TransactionOptions,
};
use strata_core::{
    ColumnFamilyId, SequenceNumber, Storage, StrataError, StrataResult, TxnId, WriteBatch,
    WriteOptions,
};
use strata_storage::Engine;
use tracing::debug;

use crate::config::DbConfig;
use crate::database::{open_engine, DatabaseHandle};

/// Database whose transactions use pessimistic locking
pub struct TransactionDb {
    engine: Arc<Engine>,
    locks: Arc<LockManager>,
    config: DbConfig,
    next_txn_id: AtomicU64,
}

impl TransactionDb {
    /// Open (or create) the database at `path`
    ///
    /// `config` is written to `strata.toml` in the data directory.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> StrataResult<Self> {
        let engine = open_engine(path.as_ref(), &config)?;
        let options = &config.transaction_db;
        let locks = Arc::new(LockManager::new(options.num_stripes, options.lock_limit()));
        Ok(TransactionDb {
            engine,
            locks,
            config,
            next_txn_id: AtomicU64::new(1),
        })
    }

    /// Open with the `strata.toml` found in `path`, or the defaults
    pub fn open_default(path: impl AsRef<Path>) -> StrataResult<Self> {
        let config = DbConfig::from_dir_or_default(path.as_ref())?;
        Self::open(path, config)
    }

    /// Lock table options in effect
    pub fn options(&self) -> &TransactionDbOptions {
        &self.config.transaction_db
    }

    /// Shared lock table
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    fn allocate_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Begin a transaction
    ///
    /// Passing a finished transaction in `reuse` recycles its buffers; it
    /// must come from this database.
    ///
    /// # Errors
    ///
    /// `InvalidHandleUse` if `reuse` belongs to another database.
    pub fn begin_transaction(
        &self,
        write_options: WriteOptions,
        txn_options: TransactionOptions,
        reuse: Option<PessimisticTransaction>,
    ) -> StrataResult<PessimisticTransaction> {
        let id = self.allocate_txn_id();
        match reuse {
            Some(mut txn) => {
                if !txn.belongs_to(&self.locks) {
                    return Err(StrataError::invalid_handle(
                        "transaction reused with a different database",
                    ));
                }
                txn.reinitialize(id, write_options, txn_options);
                Ok(txn)
            }
            None => {
                let ctx = PessimisticContext {
                    storage: self.storage(),
                    locks: Arc::clone(&self.locks),
                    db_options: self.config.transaction_db.clone(),
                };
                Ok(PessimisticTransaction::begin(id, ctx, write_options, txn_options))
            }
        }
    }

    /// Apply `batch` atomically, locking its keys like a one-shot transaction
    ///
    /// Keys are locked in (column family, key) order with the database's
    /// `default_lock_timeout`.
    pub fn write(&self, write_options: &WriteOptions, batch: &WriteBatch) -> StrataResult<SequenceNumber> {
        let txn_id = self.allocate_txn_id();
        let keys: BTreeSet<(ColumnFamilyId, &[u8])> = batch.iter().map(|r| (r.cf, r.key)).collect();
        let timeout = LockTimeout::from_millis(self.config.transaction_db.default_lock_timeout);

        let result = keys
            .iter()
            .try_for_each(|(cf, key)| {
                self.locks.acquire(&LockRequest {
                    txn_id,
                    cf: *cf,
                    key,
                    mode: LockMode::Exclusive,
                    timeout,
                    deadlock_detect: false,
                    deadlock_detect_depth: 0,
                })
            })
            .and_then(|()| self.engine.write(batch, write_options));
        self.locks.release_all(txn_id);

        if let Ok(sequence) = &result {
            debug!(target: "strata::db", txn_id, count = batch.count(), sequence, "Applied locked write");
        }
        result
    }

    /// Write one key outside any transaction
    pub fn put_cf(&self, write_options: &WriteOptions, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key, value);
        self.write(write_options, &batch).map(|_| ())
    }

    /// Add a merge operand outside any transaction
    pub fn merge_cf(&self, write_options: &WriteOptions, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        let mut batch = WriteBatch::new();
        batch.merge(cf, key, value);
        self.write(write_options, &batch).map(|_| ())
    }

    /// Delete one key outside any transaction
    pub fn delete_cf(&self, write_options: &WriteOptions, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(cf, key);
        self.write(write_options, &batch).map(|_| ())
    }

    /// `put_cf` on the default column family
    pub fn put(&self, write_options: &WriteOptions, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.put_cf(write_options, ColumnFamilyId::DEFAULT, key, value)
    }

    /// `merge_cf` on the default column family
    pub fn merge(&self, write_options: &WriteOptions, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.merge_cf(write_options, ColumnFamilyId::DEFAULT, key, value)
    }

    /// `delete_cf` on the default column family
    pub fn delete(&self, write_options: &WriteOptions, key: &[u8]) -> StrataResult<()> {
        self.delete_cf(write_options, ColumnFamilyId::DEFAULT, key)
    }
}

impl DatabaseHandle for TransactionDb {
    fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn config(&self) -> &DbConfig {
        &self.config
    }
}

impl std::fmt::Debug for TransactionDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionDb")
            .field("path", &self.engine.path())
            .field("locks", &self.locks)
            .finish()
    }
}
