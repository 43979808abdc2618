//! Optimistic (validation-based) transactions
//!
//! No locks are taken. Each touched key is tracked with the sequence it was
//! observed at; commit validates every tracked key inside the base engine's
//! write serialization and applies the batch only if no key was written in
//! the meantime (first committer wins).
//!
//! Tracked keys:
//! - every written key
//! - every key read through `get_for_update`
//! - every key read through `get` when `validate_reads` is set

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::{
    ColumnFamilyId, KvCursor, OpKind, SequenceNumber, Storage, StrataError, StrataResult, TxnId,
    WriteOptions,
};
use tracing::{debug, error};

use crate::options::OptimisticTransactionOptions;
use crate::snapshot::{ReadOptions, Snapshot};
use crate::transaction::{Transaction, TransactionStatus};
use crate::validation::validate_tracked_keys;
use crate::write_batch::WriteBatchWithIndex;

/// A validation-based transaction
pub struct OptimisticTransaction {
    id: TxnId,
    storage: Arc<dyn Storage>,
    write_options: WriteOptions,
    options: OptimisticTransactionOptions,
    status: TransactionStatus,
    batch: WriteBatchWithIndex,
    snapshot: Option<Arc<Snapshot>>,
    tracked: BTreeMap<(ColumnFamilyId, Vec<u8>), SequenceNumber>,
}

impl OptimisticTransaction {
    /// Begin a transaction
    pub fn begin(
        id: TxnId,
        storage: Arc<dyn Storage>,
        write_options: WriteOptions,
        options: OptimisticTransactionOptions,
    ) -> Self {
        let batch = WriteBatchWithIndex::new(0, true).with_merge_operator(storage.merge_operator());
        let snapshot = options
            .set_snapshot
            .then(|| Snapshot::acquire(Arc::clone(&storage)));
        debug!(target: "strata::txn", txn_id = id, "Began optimistic transaction");
        OptimisticTransaction {
            id,
            storage,
            write_options,
            options,
            status: TransactionStatus::Active,
            batch,
            snapshot,
            tracked: BTreeMap::new(),
        }
    }

    /// Reset for reuse under a new id, discarding any pending state
    pub fn reinitialize(
        &mut self,
        id: TxnId,
        write_options: WriteOptions,
        options: OptimisticTransactionOptions,
    ) {
        self.id = id;
        self.write_options = write_options;
        self.snapshot = options
            .set_snapshot
            .then(|| Snapshot::acquire(Arc::clone(&self.storage)));
        self.options = options;
        self.status = TransactionStatus::Active;
        self.batch.clear();
        self.tracked.clear();
        debug!(target: "strata::txn", txn_id = id, "Began optimistic transaction");
    }

    /// Whether this transaction runs against `storage`
    pub fn belongs_to(&self, storage: &Arc<dyn Storage>) -> bool {
        Arc::ptr_eq(&self.storage, storage)
    }

    /// Number of keys that will be validated at commit
    pub fn num_tracked_keys(&self) -> usize {
        self.tracked.len()
    }

    /// Sequence `key` is validated against, if tracked
    pub fn tracked_sequence(&self, cf: ColumnFamilyId, key: &[u8]) -> Option<SequenceNumber> {
        self.tracked.get(&(cf, key.to_vec())).copied()
    }

    fn track(&mut self, cf: ColumnFamilyId, key: &[u8]) {
        if self.tracked.contains_key(&(cf, key.to_vec())) {
            return;
        }
        let sequence = match &self.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => self.storage.current_sequence(),
        };
        self.tracked.insert((cf, key.to_vec()), sequence);
    }

    fn buffer(&mut self, kind: OpKind, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.status.ensure_active(self.id)?;
        let limit = self.options.max_write_batch_size;
        if limit > 0 && self.batch.projected_size(kind, key, value) > limit {
            return Err(StrataError::invalid_input(format!(
                "write batch would exceed max_write_batch_size of {limit} bytes"
            )));
        }
        self.track(cf, key);
        match kind {
            OpKind::Put => self.batch.put(cf, key, value),
            OpKind::Merge => self.batch.merge(cf, key, value),
            OpKind::Delete => self.batch.delete(cf, key),
        }
        Ok(())
    }

    fn read(&self, read_options: &ReadOptions, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        self.batch
            .get_from_batch_and_base(self.storage.as_ref(), read_options.read_sequence(), cf, key)
    }

    fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
        self.batch.clear();
        self.tracked.clear();
        self.snapshot = None;
    }
}

impl Transaction for OptimisticTransaction {
    fn id(&self) -> TxnId {
        self.id
    }

    fn status(&self) -> &TransactionStatus {
        &self.status
    }

    fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }

    fn write_batch(&self) -> &WriteBatchWithIndex {
        &self.batch
    }

    fn put_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.buffer(OpKind::Put, cf, key, value)
    }

    fn merge_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> StrataResult<()> {
        self.buffer(OpKind::Merge, cf, key, value)
    }

    fn delete_cf(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<()> {
        self.buffer(OpKind::Delete, cf, key, &[])
    }

    fn get_cf(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<Vec<u8>>> {
        self.status.ensure_active(self.id)?;
        if self.options.validate_reads {
            self.track(cf, key);
        }
        self.read(read_options, cf, key)
    }

    fn get_for_update_cf(
        &mut self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        _exclusive: bool,
    ) -> StrataResult<Option<Vec<u8>>> {
        self.status.ensure_active(self.id)?;
        self.track(cf, key);
        self.read(read_options, cf, key)
    }

    fn iterator_cf(&self, read_options: &ReadOptions, cf: ColumnFamilyId) -> StrataResult<KvCursor> {
        self.status.ensure_active(self.id)?;
        let base = self.storage.scan(cf, read_options.read_sequence())?;
        self.batch.iterator_with_base(cf, base)
    }

    fn commit(&mut self) -> StrataResult<()> {
        self.status.ensure_active(self.id)?;

        let txn_id = self.id;
        let tracked = &self.tracked;
        let storage = self.storage.as_ref();
        let precondition = || validate_tracked_keys(tracked, storage)?.into_result(txn_id);

        match storage.write_with_precondition(self.batch.write_batch(), &self.write_options, &precondition) {
            Ok(sequence) => {
                debug!(
                    target: "strata::txn",
                    txn_id,
                    count = self.batch.count(),
                    tracked = self.tracked.len(),
                    sequence,
                    "Committed optimistic transaction"
                );
                self.finish(TransactionStatus::Committed);
                Ok(())
            }
            Err(e @ StrataError::ConflictAborted { .. }) => {
                debug!(target: "strata::txn", txn_id, error = %e, "Optimistic validation failed");
                self.finish(TransactionStatus::ConflictAborted);
                Err(e)
            }
            Err(e) => {
                error!(target: "strata::txn", txn_id, error = %e, "Commit write failed");
                self.finish(TransactionStatus::Aborted {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> StrataResult<()> {
        match self.status {
            TransactionStatus::Active => {
                self.finish(TransactionStatus::RolledBack);
                debug!(target: "strata::txn", txn_id = self.id, "Rolled back optimistic transaction");
                Ok(())
            }
            TransactionStatus::Committed => Err(StrataError::invalid_handle(format!(
                "transaction {} already committed",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for OptimisticTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticTransaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("batch", &self.batch)
            .field("tracked", &self.tracked.len())
            .finish()
    }
}
