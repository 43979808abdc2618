//! Optimistic transaction database
//!
//! No lock table. Transactions validate their tracked keys at commit;
//! writes issued directly on the database go straight to the engine.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_concurrency::{OptimisticTransaction, OptimisticTransactionOptions};
use strata_core::{ColumnFamilyId, SequenceNumber, Storage, StrataError, StrataResult, WriteBatch, WriteOptions};
use strata_storage::Engine;

use crate::config::DbConfig;
use crate::database::{open_engine, DatabaseHandle};

/// Database whose transactions validate at commit
pub struct OptimisticTransactionDb {
    engine: Arc<Engine>,
    storage: Arc<dyn Storage>,
    config: DbConfig,
    next_txn_id: AtomicU64,
}

impl OptimisticTransactionDb {
    /// Open (or create) the database at `path`
    ///
    /// `config` is written to `strata.toml` in the data directory.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> StrataResult<Self> {
        let engine = open_engine(path.as_ref(), &config)?;
        let storage = Arc::clone(&engine) as Arc<dyn Storage>;
        Ok(OptimisticTransactionDb {
            engine,
            storage,
            config,
            next_txn_id: AtomicU64::new(1),
        })
    }

    /// Open with the `strata.toml` found in `path`, or the defaults
    pub fn open_default(path: impl AsRef<Path>) -> StrataResult<Self> {
        let config = DbConfig::from_dir_or_default(path.as_ref())?;
        Self::open(path, config)
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
        txn_options: OptimisticTransactionOptions,
        reuse: Option<OptimisticTransaction>,
    ) -> StrataResult<OptimisticTransaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        match reuse {
            Some(mut txn) => {
                if !txn.belongs_to(&self.storage) {
                    return Err(StrataError::invalid_handle(
                        "transaction reused with a different database",
                    ));
                }
                txn.reinitialize(id, write_options, txn_options);
                Ok(txn)
            }
            None => Ok(OptimisticTransaction::begin(
                id,
                Arc::clone(&self.storage),
                write_options,
                txn_options,
            )),
        }
    }

    /// Apply `batch` atomically
    pub fn write(&self, write_options: &WriteOptions, batch: &WriteBatch) -> StrataResult<SequenceNumber> {
        self.engine.write(batch, write_options)
    }

    /// Write one key outside any transaction
    pub fn put_cf(&self, write_options: &WriteOptions, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.engine.put(write_options, cf, key, value).map(|_| ())
    }

    /// Add a merge operand outside any transaction
    pub fn merge_cf(&self, write_options: &WriteOptions, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.engine.merge(write_options, cf, key, value).map(|_| ())
    }

    /// Delete one key outside any transaction
    pub fn delete_cf(&self, write_options: &WriteOptions, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<()> {
        self.engine.delete(write_options, cf, key).map(|_| ())
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

impl DatabaseHandle for OptimisticTransactionDb {
    fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn config(&self) -> &DbConfig {
        &self.config
    }

    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }
}

impl std::fmt::Debug for OptimisticTransactionDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticTransactionDb")
            .field("path", &self.engine.path())
            .finish()
    }
}
