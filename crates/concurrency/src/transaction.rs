//! Transaction surface shared by pessimistic and optimistic transactions
//!
//! Every operation has a column-family form (`*_cf`) and a default-family
//! shorthand. Once a transaction leaves `Active`, every operation except
//! `rollback` fails with `InvalidHandleUse` (or `TransactionExpired` for an
//! expired one).

use std::sync::Arc;

use strata_core::{ColumnFamilyId, KvCursor, StrataError, StrataResult, TxnId};

use crate::snapshot::{ReadOptions, Snapshot};
use crate::write_batch::WriteBatchWithIndex;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting reads and writes
    Active,
    /// Writes applied atomically
    Committed,
    /// Discarded by the caller
    RolledBack,
    /// Outlived its expiration deadline; locks released
    Expired,
    /// Optimistic validation failed; nothing applied
    ConflictAborted,
    /// The base engine rejected the commit write
    Aborted {
        /// Error reported by the base engine
        reason: String,
    },
}

impl TransactionStatus {
    /// True while the transaction accepts operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::Active)
    }

    /// True once no further operation is allowed
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Fail unless the transaction is active
    pub fn ensure_active(&self, txn_id: TxnId) -> StrataResult<()> {
        match self {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Expired => Err(StrataError::TransactionExpired { txn_id }),
            other => Err(StrataError::invalid_handle(format!(
                "transaction {txn_id} is not active: {other:?}"
            ))),
        }
    }
}

/// Operations every transaction supports
pub trait Transaction {
    /// Identity, unique within the owning database
    fn id(&self) -> TxnId;

    /// Current lifecycle state
    fn status(&self) -> &TransactionStatus;

    /// Snapshot bound at begin, if any
    fn snapshot(&self) -> Option<&Arc<Snapshot>>;

    /// Buffered, uncommitted writes
    fn write_batch(&self) -> &WriteBatchWithIndex;

    /// Buffer a put
    fn put_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()>;

    /// Buffer a merge operand
    fn merge_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()>;

    /// Buffer a delete
    fn delete_cf(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<()>;

    /// Read own writes first, then the base engine
    fn get_cf(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<Vec<u8>>>;

    /// Read `key` and protect it until commit
    ///
    /// `exclusive` selects the lock mode where locks are used.
    fn get_for_update_cf(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        exclusive: bool,
    ) -> StrataResult<Option<Vec<u8>>>;

    /// Cursor over the base engine with own writes applied on top
    fn iterator_cf(&self, read_options: &ReadOptions, cf: ColumnFamilyId) -> StrataResult<KvCursor>;

    /// Apply every buffered write atomically
    fn commit(&mut self) -> StrataResult<()>;

    /// Discard buffered writes
    ///
    /// Idempotent on a transaction that did not commit.
    fn rollback(&mut self) -> StrataResult<()>;

    /// `put_cf` on the default column family
    fn put(&mut self, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.put_cf(ColumnFamilyId::DEFAULT, key, value)
    }

    /// `merge_cf` on the default column family
    fn merge(&mut self, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.merge_cf(ColumnFamilyId::DEFAULT, key, value)
    }

    /// `delete_cf` on the default column family
    fn delete(&mut self, key: &[u8]) -> StrataResult<()> {
        self.delete_cf(ColumnFamilyId::DEFAULT, key)
    }

    /// `get_cf` on the default column family
    fn get(&mut self, read_options: &ReadOptions, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        self.get_cf(read_options, ColumnFamilyId::DEFAULT, key)
    }

    /// Exclusive `get_for_update_cf` on the default column family
    fn get_for_update(
        &mut self,
        read_options: &ReadOptions,
        key: &[u8],
    ) -> StrataResult<Option<Vec<u8>>> {
        self.get_for_update_cf(read_options, ColumnFamilyId::DEFAULT, key, true)
    }

    /// `iterator_cf` on the default column family
    fn iterator(&self, read_options: &ReadOptions) -> StrataResult<KvCursor> {
        self.iterator_cf(read_options, ColumnFamilyId::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_active() {
        assert!(TransactionStatus::Active.ensure_active(1).is_ok());
        assert!(matches!(
            TransactionStatus::Expired.ensure_active(1),
            Err(StrataError::TransactionExpired { txn_id: 1 })
        ));
        for status in [
            TransactionStatus::Committed,
            TransactionStatus::RolledBack,
            TransactionStatus::ConflictAborted,
            TransactionStatus::Aborted {
                reason: "disk full".into(),
            },
        ] {
            assert!(status.is_terminal());
            assert!(matches!(
                status.ensure_active(1),
                Err(StrataError::InvalidHandleUse { .. })
            ));
        }
    }
}
