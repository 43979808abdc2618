//! Shared test utilities for the root integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

pub use strata_txndb::{
    ColumnFamilyId, DatabaseHandle, DbConfig, OptimisticTransactionDb, OptimisticTransactionOptions,
    ReadOptions, Storage, StrataError, Transaction, TransactionDb, TransactionOptions, TransactionStatus,
    WriteOptions,
};

// ============================================================================
// TestDir
// ============================================================================

/// Temporary database directory; the database lives under `db/`
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        TestDir {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    pub fn child(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn open_pessimistic(&self) -> TransactionDb {
        TransactionDb::open(self.db_path(), DbConfig::default()).expect("open TransactionDb")
    }

    pub fn open_optimistic(&self) -> OptimisticTransactionDb {
        OptimisticTransactionDb::open(self.db_path(), DbConfig::default())
            .expect("open OptimisticTransactionDb")
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn wo() -> WriteOptions {
    WriteOptions::default()
}

pub fn latest(db: &dyn DatabaseHandle, key: &[u8]) -> Option<Vec<u8>> {
    db.get(&ReadOptions::new(), key).expect("read")
}

pub fn collect(mut cursor: strata_txndb::KvCursor) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    cursor.seek_to_first();
    while cursor.valid() {
        out.push((
            cursor.key().unwrap().to_vec(),
            cursor.value().unwrap().to_vec(),
        ));
        cursor.next();
    }
    out
}
