//! Error types for Strata
//!
//! Concurrency-control failures (`LockTimeout`, `DeadlockDetected`,
//! `ConflictAborted`, `LockLimitExceeded`) are recoverable: the caller may
//! retry. Everything surfaced by the base engine is passed through unchanged
//! and is fatal for the write path that produced it.
//!
//! We use `thiserror` for `Display` and `Error` implementations.

use crate::types::{ColumnFamilyId, TxnId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = std::result::Result<T, StrataError>;

/// Error hierarchy for the transactional layer
#[derive(Debug, Error)]
pub enum StrataError {
    /// Lock on a key was not granted within the resolved timeout
    #[error("lock wait timed out on key {} in column family {cf}", String::from_utf8_lossy(.key))]
    LockTimeout {
        /// Column family of the contended key
        cf: ColumnFamilyId,
        /// The contended key
        key: Vec<u8>,
    },

    /// Waiting for the lock would close a cycle in the wait-for graph
    #[error("deadlock detected for transaction {txn_id} on key {} in column family {cf}", String::from_utf8_lossy(.key))]
    DeadlockDetected {
        /// Transaction that requested the lock
        txn_id: TxnId,
        /// Column family of the requested key
        cf: ColumnFamilyId,
        /// The requested key
        key: Vec<u8>,
    },

    /// The per-column-family lock cap was reached
    #[error("lock limit of {limit} reached in column family {cf}")]
    LockLimitExceeded {
        /// Column family whose lock count is exhausted
        cf: ColumnFamilyId,
        /// Configured maximum
        limit: usize,
    },

    /// Transaction outlived its expiration deadline
    #[error("transaction {txn_id} expired")]
    TransactionExpired {
        /// The expired transaction
        txn_id: TxnId,
    },

    /// Optimistic validation found a write committed after the tracked point
    #[error("transaction {txn_id} aborted: {conflicts} conflicting key(s), first {} in column family {cf}", String::from_utf8_lossy(.key))]
    ConflictAborted {
        /// The aborted transaction
        txn_id: TxnId,
        /// Number of conflicting keys
        conflicts: usize,
        /// Column family of the first conflicting key
        cf: ColumnFamilyId,
        /// First conflicting key
        key: Vec<u8>,
    },

    /// Checkpoint directory already exists
    #[error("checkpoint target {} already exists", .path.display())]
    CheckpointTargetExists {
        /// Requested checkpoint directory
        path: PathBuf,
    },

    /// Checkpoint materialization failed
    #[error("checkpoint to {} failed: {source}", .path.display())]
    CheckpointIo {
        /// Requested checkpoint directory
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Use of a finished transaction or otherwise invalid handle
    #[error("invalid handle use: {message}")]
    InvalidHandleUse {
        /// Description of the misuse
        message: String,
    },

    /// Invalid argument passed to the engine or a transaction
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument
        message: String,
    },

    /// I/O error from the base engine
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data failed validation
    #[error("data corruption: {message}")]
    Corruption {
        /// What failed to validate
        message: String,
    },

    /// Other base engine failure
    #[error("storage error: {message}")]
    Storage {
        /// Engine supplied description
        message: String,
    },
}

impl StrataError {
    /// Invalid argument error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        StrataError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Generic storage engine error
    pub fn storage(message: impl Into<String>) -> Self {
        StrataError::Storage {
            message: message.into(),
        }
    }

    /// Corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        StrataError::Corruption {
            message: message.into(),
        }
    }

    /// Invalid handle use error
    pub fn invalid_handle(message: impl Into<String>) -> Self {
        StrataError::InvalidHandleUse {
            message: message.into(),
        }
    }

    /// Whether a fresh attempt of the same work may succeed
    ///
    /// True for concurrency-control failures only. Storage errors and
    /// programming errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StrataError::LockTimeout { .. }
                | StrataError::DeadlockDetected { .. }
                | StrataError::ConflictAborted { .. }
                | StrataError::LockLimitExceeded { .. }
        )
    }

    /// Whether this error originated in the base engine
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            StrataError::Io(_)
                | StrataError::Corruption { .. }
                | StrataError::Storage { .. }
                | StrataError::InvalidArgument { .. }
        )
    }
}
