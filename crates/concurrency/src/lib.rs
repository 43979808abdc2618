//! Concurrency control for Strata
//!
//! This crate implements the transactional layer over the base engine:
//! - LockManager: striped per-key lock table with timeouts and deadlock detection
//! - PessimisticTransaction: lock-on-write transactions
//! - OptimisticTransaction: validate-at-commit transactions
//! - WriteBatchWithIndex: buffered writes with read-your-own-writes
//! - Snapshot: pinned point-in-time read views

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod optimistic;
pub mod options;
pub mod pessimistic;
pub mod snapshot;
pub mod transaction;
pub mod validation;
pub mod write_batch;

pub use lock::{LockKey, LockManager, LockMode, LockRequest};
pub use optimistic::OptimisticTransaction;
pub use options::{
    LockTimeout, OptimisticTransactionOptions, TransactionDbOptions, TransactionOptions,
};
pub use pessimistic::{PessimisticContext, PessimisticTransaction};
pub use snapshot::{ReadOptions, Snapshot};
pub use transaction::{Transaction, TransactionStatus};
pub use validation::{validate_tracked_keys, ConflictType, ValidationResult};
pub use write_batch::{BatchLookup, WriteBatchWithIndex};
