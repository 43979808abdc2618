//! Core traits for the base engine contract
//!
//! The transactional layer never touches files or memtables directly. It
//! reads and writes through `Storage`, which lets tests substitute a
//! failing or instrumented engine.

use std::sync::Arc;

use crate::error::StrataResult;
use crate::types::{ColumnFamilyId, SequenceNumber, WriteBatch, WriteOptions};

/// Combines merge operands with an existing value
pub trait MergeOperator: Send + Sync {
    /// Name recorded for diagnostics
    fn name(&self) -> &str;

    /// Fold `operands` (oldest first) onto `existing`
    ///
    /// # Errors
    ///
    /// Returns an error if the operands cannot be combined.
    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> StrataResult<Vec<u8>>;
}

/// Base ordered key/value engine
///
/// Thread safety: every method may be called concurrently from multiple
/// threads.
///
/// Sequence numbers are strictly increasing. A write batch is visible
/// entirely or not at all: once `current_sequence()` returns `s`, every
/// write with sequence `<= s` is readable.
pub trait Storage: Send + Sync {
    /// Read `key` as of `read_seq`, or the latest state when `None`
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
        read_seq: Option<SequenceNumber>,
    ) -> StrataResult<Option<Vec<u8>>>;

    /// Sequence of the newest write (including deletes) to `key`
    ///
    /// Returns `None` when the key has never been written.
    fn latest_sequence(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<SequenceNumber>>;

    /// All live entries of `cf` in key order as of `read_seq`
    fn scan(
        &self,
        cf: ColumnFamilyId,
        read_seq: Option<SequenceNumber>,
    ) -> StrataResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply `batch` atomically, after `precondition` succeeds
    ///
    /// The precondition runs while writers are serialized, so no other
    /// write can land between the check and the apply. An error from the
    /// precondition is returned unchanged and nothing is written.
    ///
    /// Returns the sequence assigned to the last record of the batch.
    fn write_with_precondition(
        &self,
        batch: &WriteBatch,
        options: &WriteOptions,
        precondition: &dyn Fn() -> StrataResult<()>,
    ) -> StrataResult<SequenceNumber>;

    /// Apply `batch` atomically
    fn write(&self, batch: &WriteBatch, options: &WriteOptions) -> StrataResult<SequenceNumber> {
        self.write_with_precondition(batch, options, &|| Ok(()))
    }

    /// Sequence of the newest visible write
    fn current_sequence(&self) -> SequenceNumber;

    /// Pin the current sequence so its versions stay readable
    fn acquire_snapshot(&self) -> SequenceNumber;

    /// Unpin a sequence returned by `acquire_snapshot`
    fn release_snapshot(&self, seq: SequenceNumber);

    /// Operator used to resolve merge records
    fn merge_operator(&self) -> Arc<dyn MergeOperator>;
}
