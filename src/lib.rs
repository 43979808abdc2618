//! Strata TxnDB - embedded ordered key-value store with transactions
//!
//! Two database flavors share one base engine:
//!
//! - [`TransactionDb`]: pessimistic transactions. Keys are locked when
//!   written or read for update; conflicts surface as lock timeouts or
//!   detected deadlocks.
//! - [`OptimisticTransactionDb`]: optimistic transactions. Nothing is
//!   locked; commit validates every tracked key and the first committer
//!   wins.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_txndb::{
//!     DatabaseHandle, ReadOptions, Transaction, TransactionDb, TransactionOptions, WriteOptions,
//! };
//!
//! let db = TransactionDb::open_default("/tmp/strata")?;
//! let mut txn = db.begin_transaction(WriteOptions::default(), TransactionOptions::default(), None)?;
//! txn.put(b"user:1", b"alice")?;
//! txn.commit()?;
//!
//! assert_eq!(db.get(&ReadOptions::new(), b"user:1")?, Some(b"alice".to_vec()));
//! ```
//!
//! # Architecture
//!
//! - `strata-core`: shared types, errors and the `Storage` contract
//! - `strata-durability`: WAL, table files and manifest
//! - `strata-storage`: the MVCC base engine and on-disk checkpoints
//! - `strata-concurrency`: lock table, write batch index, transactions
//! - `strata-engine`: database handles and configuration

pub use strata_concurrency::{
    BatchLookup, LockManager, LockMode, LockTimeout, OptimisticTransaction,
    OptimisticTransactionOptions, PessimisticTransaction, ReadOptions, Snapshot, Transaction,
    TransactionDbOptions, TransactionOptions, TransactionStatus, WriteBatchWithIndex,
};
pub use strata_core::{
    ColumnFamilyId, ConcatMergeOperator, KvCursor, MergeOperator, SequenceNumber, StrataError,
    Storage, StrataResult, TxnId, WriteBatch, WriteOptions,
};
pub use strata_engine::{
    Checkpoint, DatabaseHandle, DbConfig, OptimisticTransactionDb, TransactionDb, CONFIG_FILE_NAME,
};
pub use strata_storage::EngineOptions;
