//! Transaction and transaction-database options
//!
//! Timeouts are in milliseconds. Negative means wait forever, zero means
//! fail immediately when a lock is not free.

use serde::{Deserialize, Serialize};

/// Lock timeout as configured
///
/// Keeps the three-way meaning of the raw integer explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    /// Wait until granted
    Infinite,
    /// Fail unless the lock is free right now
    NoWait,
    /// Wait at most this many milliseconds
    Millis(u64),
}

impl LockTimeout {
    /// Interpret a raw millisecond setting
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => LockTimeout::Infinite,
            0 => LockTimeout::NoWait,
            ms => LockTimeout::Millis(ms as u64),
        }
    }

    /// Resolve the effective timeout of one acquisition
    ///
    /// An explicit per-acquire value wins, then a non-negative
    /// per-transaction value, then the database default.
    pub fn resolve(per_acquire: Option<i64>, per_txn: i64, database_default: i64) -> Self {
        match per_acquire {
            Some(ms) => Self::from_millis(ms),
            None if per_txn >= 0 => Self::from_millis(per_txn),
            None => Self::from_millis(database_default),
        }
    }
}

fn default_max_num_locks() -> i64 {
    -1
}

fn default_num_stripes() -> usize {
    16
}

fn default_lock_timeout_ms() -> i64 {
    1000
}

fn default_unset() -> i64 {
    -1
}

fn default_deadlock_detect_depth() -> usize {
    50
}

/// Options of a pessimistic transaction database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDbOptions {
    /// Maximum locks held per column family (negative = unlimited)
    #[serde(default = "default_max_num_locks")]
    pub max_num_locks: i64,
    /// Number of lock table stripes
    #[serde(default = "default_num_stripes")]
    pub num_stripes: usize,
    /// Lock timeout for transactions that do not set their own
    #[serde(default = "default_lock_timeout_ms")]
    pub transaction_lock_timeout: i64,
    /// Lock timeout of writes issued outside any transaction
    #[serde(default = "default_lock_timeout_ms")]
    pub default_lock_timeout: i64,
}

impl Default for TransactionDbOptions {
    fn default() -> Self {
        Self {
            max_num_locks: default_max_num_locks(),
            num_stripes: default_num_stripes(),
            transaction_lock_timeout: default_lock_timeout_ms(),
            default_lock_timeout: default_lock_timeout_ms(),
        }
    }
}

impl TransactionDbOptions {
    /// Per-column-family lock cap, if any
    pub fn lock_limit(&self) -> Option<usize> {
        (self.max_num_locks >= 0).then_some(self.max_num_locks as usize)
    }
}

/// Options of a single pessimistic transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Bind a snapshot at begin; writes then fail on keys changed since
    #[serde(default)]
    pub set_snapshot: bool,
    /// Detect deadlocks before waiting on a lock
    #[serde(default)]
    pub deadlock_detect: bool,
    /// Lock timeout in ms (negative = use the database setting)
    #[serde(default = "default_unset")]
    pub lock_timeout: i64,
    /// Lifetime in ms after which the transaction expires (negative = never)
    #[serde(default = "default_unset")]
    pub expiration: i64,
    /// Maximum wait-for chain length explored by deadlock detection
    #[serde(default = "default_deadlock_detect_depth")]
    pub deadlock_detect_depth: usize,
    /// Maximum buffered batch size in bytes (0 = unlimited)
    #[serde(default)]
    pub max_write_batch_size: usize,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            set_snapshot: false,
            deadlock_detect: false,
            lock_timeout: default_unset(),
            expiration: default_unset(),
            deadlock_detect_depth: default_deadlock_detect_depth(),
            max_write_batch_size: 0,
        }
    }
}

/// Options of a single optimistic transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticTransactionOptions {
    /// Bind a snapshot at begin and validate against it
    #[serde(default)]
    pub set_snapshot: bool,
    /// Also validate keys read with plain `get`
    #[serde(default)]
    pub validate_reads: bool,
    /// Maximum buffered batch size in bytes (0 = unlimited)
    #[serde(default)]
    pub max_write_batch_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let db = TransactionDbOptions::default();
        assert_eq!(db.max_num_locks, -1);
        assert_eq!(db.num_stripes, 16);
        assert_eq!(db.transaction_lock_timeout, 1000);
        assert_eq!(db.default_lock_timeout, 1000);
        assert_eq!(db.lock_limit(), None);

        let txn = TransactionOptions::default();
        assert!(!txn.set_snapshot);
        assert!(!txn.deadlock_detect);
        assert_eq!(txn.lock_timeout, -1);
        assert_eq!(txn.expiration, -1);
        assert_eq!(txn.deadlock_detect_depth, 50);
    }

    #[test]
    fn test_timeout_interpretation() {
        assert_eq!(LockTimeout::from_millis(-1), LockTimeout::Infinite);
        assert_eq!(LockTimeout::from_millis(0), LockTimeout::NoWait);
        assert_eq!(LockTimeout::from_millis(25), LockTimeout::Millis(25));
    }

    #[test]
    fn test_timeout_resolution_order() {
        assert_eq!(LockTimeout::resolve(Some(0), 500, 1000), LockTimeout::NoWait);
        assert_eq!(
            LockTimeout::resolve(None, 500, 1000),
            LockTimeout::Millis(500)
        );
        assert_eq!(
            LockTimeout::resolve(None, -1, 1000),
            LockTimeout::Millis(1000)
        );
        assert_eq!(LockTimeout::resolve(None, -1, -1), LockTimeout::Infinite);
    }
}
