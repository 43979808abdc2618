//! Core types and traits for Strata
//!
//! This crate defines the foundational pieces shared by every layer:
//! - ColumnFamilyId, SequenceNumber, TxnId: identifiers
//! - WriteBatch: ordered, serializable mutation list applied atomically
//! - KvCursor: bidirectional cursor over ordered key/value pairs
//! - Storage, MergeOperator: the base engine contract
//! - StrataError: error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod error;
pub mod merge;
pub mod traits;
pub mod types;

pub use cursor::KvCursor;
pub use error::{StrataError, StrataResult};
pub use merge::ConcatMergeOperator;
pub use traits::{MergeOperator, Storage};
pub use types::{
    BatchRecord, ColumnFamilyId, OpKind, SequenceNumber, TxnId, WriteBatch, WriteBatchIter, WriteOptions,
    WRITE_BATCH_HEADER_SIZE,
};
