//! Indexed write batch
//!
//! A `WriteBatch` plus an ordered index over its records, so buffered
//! mutations can be read back before commit. The index maps
//! (column family, key) to the offsets of every record for that key in
//! insertion order; the batch itself keeps all records so that `data()`
//! is exactly what the base engine applies.
//!
//! With `overwrite_key`, iteration yields only the last mutation of each
//! key. Without it, every mutation is yielded, ordered by key and then by
//! insertion order.

use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::SmallVec;
use strata_core::{
    BatchRecord, ColumnFamilyId, ConcatMergeOperator, KvCursor, MergeOperator, OpKind,
    SequenceNumber, Storage, StrataResult, WriteBatch,
};

type IndexKey = (ColumnFamilyId, Vec<u8>);

/// Outcome of looking a key up in the batch alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchLookup {
    /// The batch fully determines the value
    Found(Vec<u8>),
    /// The batch deletes the key
    Deleted,
    /// The batch never touches the key
    NotFound,
    /// Only merge operands are buffered (oldest first); the base value is needed
    MergeInProgress(Vec<Vec<u8>>),
}

/// Write batch with an ordered, searchable index
pub struct WriteBatchWithIndex {
    batch: WriteBatch,
    index: BTreeMap<IndexKey, SmallVec<[usize; 1]>>,
    overwrite_key: bool,
    merge_operator: Arc<dyn MergeOperator>,
}

impl WriteBatchWithIndex {
    /// Create an empty batch
    ///
    /// `reserved_bytes` pre-sizes the serialized buffer.
    pub fn new(reserved_bytes: usize, overwrite_key: bool) -> Self {
        WriteBatchWithIndex {
            batch: WriteBatch::with_reserved_bytes(reserved_bytes),
            index: BTreeMap::new(),
            overwrite_key,
            merge_operator: Arc::new(ConcatMergeOperator::new()),
        }
    }

    /// Replace the operator used to fold buffered merges
    pub fn with_merge_operator(mut self, operator: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = operator;
        self
    }

    /// Buffer a put
    pub fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) {
        self.append(OpKind::Put, cf, key, value);
    }

    /// Buffer a merge operand
    pub fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) {
        self.append(OpKind::Merge, cf, key, value);
    }

    /// Buffer a delete
    pub fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) {
        self.append(OpKind::Delete, cf, key, &[]);
    }

    fn append(&mut self, kind: OpKind, cf: ColumnFamilyId, key: &[u8], value: &[u8]) {
        let offset = self.batch.append(kind, cf, key, value);
        self.index.entry((cf, key.to_vec())).or_default().push(offset);
    }

    /// Serialized size after buffering one more record
    pub fn projected_size(&self, kind: OpKind, key: &[u8], value: &[u8]) -> usize {
        let value_part = if kind == OpKind::Delete {
            0
        } else {
            4 + value.len()
        };
        self.batch.size_in_bytes() + 1 + 4 + 4 + key.len() + value_part
    }

    /// Look `key` up in the batch only
    pub fn get_from_batch(&self, cf: ColumnFamilyId, key: &[u8]) -> StrataResult<BatchLookup> {
        let Some(offsets) = self.index.get(&(cf, key.to_vec())) else {
            return Ok(BatchLookup::NotFound);
        };

        let mut operands: Vec<&[u8]> = Vec::new();
        for record in offsets.iter().rev().filter_map(|o| self.batch.record_at(*o)) {
            match record.kind {
                OpKind::Merge => operands.push(record.value),
                OpKind::Put => {
                    return if operands.is_empty() {
                        Ok(BatchLookup::Found(record.value.to_vec()))
                    } else {
                        operands.reverse();
                        self.merge_operator
                            .full_merge(key, Some(record.value), &operands)
                            .map(BatchLookup::Found)
                    };
                }
                OpKind::Delete => {
                    return if operands.is_empty() {
                        Ok(BatchLookup::Deleted)
                    } else {
                        operands.reverse();
                        self.merge_operator
                            .full_merge(key, None, &operands)
                            .map(BatchLookup::Found)
                    };
                }
            }
        }

        if operands.is_empty() {
            return Ok(BatchLookup::NotFound);
        }
        operands.reverse();
        Ok(BatchLookup::MergeInProgress(
            operands.into_iter().map(<[u8]>::to_vec).collect(),
        ))
    }

    /// Look `key` up in the batch, falling back to `storage` at `read_seq`
    ///
    /// Buffered merge operands are folded onto the base value.
    pub fn get_from_batch_and_base(
        &self,
        storage: &dyn Storage,
        read_seq: Option<SequenceNumber>,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<Vec<u8>>> {
        match self.get_from_batch(cf, key)? {
            BatchLookup::Found(value) => Ok(Some(value)),
            BatchLookup::Deleted => Ok(None),
            BatchLookup::NotFound => storage.get(cf, key, read_seq),
            BatchLookup::MergeInProgress(operands) => {
                let base = storage.get(cf, key, read_seq)?;
                let operands: Vec<&[u8]> = operands.iter().map(Vec::as_slice).collect();
                self.merge_operator
                    .full_merge(key, base.as_deref(), &operands)
                    .map(Some)
            }
        }
    }

    /// Buffered records in (column family, key) order
    ///
    /// Lazy; call again to restart.
    pub fn iter(&self) -> impl Iterator<Item = BatchRecord<'_>> + '_ {
        self.index
            .values()
            .flat_map(move |offsets| self.visible_offsets(offsets))
            .filter_map(move |offset| self.batch.record_at(*offset))
    }

    /// Buffered records of one column family in key order
    pub fn iter_cf(&self, cf: ColumnFamilyId) -> impl Iterator<Item = BatchRecord<'_>> + '_ {
        self.index
            .range((cf, Vec::new())..)
            .take_while(move |((entry_cf, _), _)| *entry_cf == cf)
            .flat_map(move |(_, offsets)| self.visible_offsets(offsets))
            .filter_map(move |offset| self.batch.record_at(*offset))
    }

    fn visible_offsets<'a>(&self, offsets: &'a SmallVec<[usize; 1]>) -> &'a [usize] {
        if self.overwrite_key {
            &offsets[offsets.len().saturating_sub(1)..]
        } else {
            &offsets[..]
        }
    }

    /// Cursor over `base_entries` with the batch applied on top
    ///
    /// `base_entries` must be sorted by key. Batch state wins per key.
    pub fn iterator_with_base(
        &self,
        cf: ColumnFamilyId,
        base_entries: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> StrataResult<KvCursor> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = base_entries.into_iter().collect();
        let keys: Vec<&Vec<u8>> = self
            .index
            .range((cf, Vec::new())..)
            .take_while(|((entry_cf, _), _)| *entry_cf == cf)
            .map(|((_, key), _)| key)
            .collect();

        for key in keys {
            match self.get_from_batch(cf, key)? {
                BatchLookup::Found(value) => {
                    merged.insert(key.clone(), value);
                }
                BatchLookup::Deleted => {
                    merged.remove(key);
                }
                BatchLookup::NotFound => {}
                BatchLookup::MergeInProgress(operands) => {
                    let operands: Vec<&[u8]> = operands.iter().map(Vec::as_slice).collect();
                    let value = self.merge_operator.full_merge(
                        key,
                        merged.get(key).map(Vec::as_slice),
                        &operands,
                    )?;
                    merged.insert(key.clone(), value);
                }
            }
        }
        Ok(KvCursor::new(merged.into_iter().collect()))
    }

    /// Distinct (column family, key) pairs touched by the batch
    pub fn keys(&self) -> impl Iterator<Item = (ColumnFamilyId, &[u8])> + '_ {
        self.index.keys().map(|(cf, key)| (*cf, key.as_slice()))
    }

    /// Underlying batch, as applied at commit
    pub fn write_batch(&self) -> &WriteBatch {
        &self.batch
    }

    /// Serialized form of the underlying batch
    pub fn data(&self) -> &[u8] {
        self.batch.data()
    }

    /// Number of buffered operations (not distinct keys)
    pub fn count(&self) -> usize {
        self.batch.count()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Whether iteration collapses mutations per key
    pub fn overwrite_key(&self) -> bool {
        self.overwrite_key
    }

    /// Serialized size in bytes
    pub fn size_in_bytes(&self) -> usize {
        self.batch.size_in_bytes()
    }

    /// Drop every buffered mutation
    pub fn clear(&mut self) {
        self.batch.clear();
        self.index.clear();
    }
}

impl std::fmt::Debug for WriteBatchWithIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatchWithIndex")
            .field("count", &self.count())
            .field("keys", &self.index.len())
            .field("overwrite_key", &self.overwrite_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CF: ColumnFamilyId = ColumnFamilyId::DEFAULT;

    fn collect(batch: &WriteBatchWithIndex) -> Vec<(OpKind, Vec<u8>, Vec<u8>)> {
        batch
            .iter()
            .map(|r| (r.kind, r.key.to_vec(), r.value.to_vec()))
            .collect()
    }

    // === Lookup ===

    #[test]
    fn test_lookup_states() {
        let mut batch = WriteBatchWithIndex::new(0, false);
        batch.put(CF, b"a", b"1");
        batch.delete(CF, b"b");
        batch.merge(CF, b"c", b"x");

        assert_eq!(batch.get_from_batch(CF, b"a").unwrap(), BatchLookup::Found(b"1".to_vec()));
        assert_eq!(batch.get_from_batch(CF, b"b").unwrap(), BatchLookup::Deleted);
        assert_eq!(batch.get_from_batch(CF, b"z").unwrap(), BatchLookup::NotFound);
        assert_eq!(
            batch.get_from_batch(CF, b"c").unwrap(),
            BatchLookup::MergeInProgress(vec![b"x".to_vec()])
        );
    }

    #[test]
    fn test_merge_on_buffered_put() {
        let mut batch = WriteBatchWithIndex::new(0, false);
        batch.put(CF, b"k", b"a");
        batch.merge(CF, b"k", b"b");
        batch.merge(CF, b"k", b"c");
        assert_eq!(batch.get_from_batch(CF, b"k").unwrap(), BatchLookup::Found(b"abc".to_vec()));
    }

    #[test]
    fn test_merge_after_delete_ignores_base() {
        let mut batch = WriteBatchWithIndex::new(0, false);
        batch.delete(CF, b"k");
        batch.merge(CF, b"k", b"x");
        assert_eq!(batch.get_from_batch(CF, b"k").unwrap(), BatchLookup::Found(b"x".to_vec()));
    }

    #[test]
    fn test_column_families_are_separate() {
        let mut batch = WriteBatchWithIndex::new(0, true);
        batch.put(CF, b"k", b"default");
        batch.put(ColumnFamilyId(1), b"k", b"other");
        assert_eq!(
            batch.get_from_batch(ColumnFamilyId(1), b"k").unwrap(),
            BatchLookup::Found(b"other".to_vec())
        );
        assert_eq!(batch.iter_cf(ColumnFamilyId(1)).count(), 1);
    }

    // === Overwrite policy ===

    #[test]
    fn test_overwrite_iteration_yields_last_per_key() {
        let mut batch = WriteBatchWithIndex::new(0, true);
        batch.put(CF, b"k", b"1");
        batch.put(CF, b"k", b"2");
        batch.delete(CF, b"k");
        batch.put(CF, b"a", b"x");

        let items = collect(&batch);
        assert_eq!(
            items,
            vec![
                (OpKind::Put, b"a".to_vec(), b"x".to_vec()),
                (OpKind::Delete, b"k".to_vec(), Vec::new()),
            ]
        );
        assert_eq!(batch.count(), 4);
    }

    #[test]
    fn test_non_overwrite_iteration_yields_every_mutation() {
        let mut batch = WriteBatchWithIndex::new(0, false);
        batch.put(CF, b"k", b"1");
        batch.put(CF, b"a", b"x");
        batch.put(CF, b"k", b"2");

        let items = collect(&batch);
        assert_eq!(
            items,
            vec![
                (OpKind::Put, b"a".to_vec(), b"x".to_vec()),
                (OpKind::Put, b"k".to_vec(), b"1".to_vec()),
                (OpKind::Put, b"k".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut batch = WriteBatchWithIndex::new(0, true);
        batch.put(CF, b"b", b"2");
        batch.put(CF, b"a", b"1");
        assert_eq!(collect(&batch), collect(&batch));
    }

    // === Base merge ===

    #[test]
    fn test_iterator_with_base() {
        let mut batch = WriteBatchWithIndex::new(0, true);
        batch.put(CF, b"b", b"batch");
        batch.delete(CF, b"c");
        batch.merge(CF, b"d", b"+");
        batch.put(CF, b"e", b"new");

        let base = vec![
            (b"a".to_vec(), b"base".to_vec()),
            (b"b".to_vec(), b"base".to_vec()),
            (b"c".to_vec(), b"base".to_vec()),
            (b"d".to_vec(), b"base".to_vec()),
        ];
        let cursor = batch.iterator_with_base(CF, base).unwrap();
        assert_eq!(
            cursor.into_vec(),
            vec![
                (b"a".to_vec(), b"base".to_vec()),
                (b"b".to_vec(), b"batch".to_vec()),
                (b"d".to_vec(), b"base+".to_vec()),
                (b"e".to_vec(), b"new".to_vec()),
            ]
        );
    }

    #[test]
    fn test_data_is_applied_form() {
        let mut batch = WriteBatchWithIndex::new(64, true);
        batch.put(CF, b"k", b"1");
        batch.put(CF, b"k", b"2");
        let decoded = WriteBatch::from_bytes(batch.data().to_vec()).unwrap();
        assert_eq!(decoded.count(), 2);
        assert_eq!(decoded.data().len(), batch.size_in_bytes());
    }

    #[test]
    fn test_clear() {
        let mut batch = WriteBatchWithIndex::new(0, false);
        batch.put(CF, b"k", b"1");
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.get_from_batch(CF, b"k").unwrap(), BatchLookup::NotFound);
        assert_eq!(batch.iter().count(), 0);
    }

    #[test]
    fn test_projected_size_matches_append() {
        let mut batch = WriteBatchWithIndex::new(0, false);
        let projected = batch.projected_size(OpKind::Put, b"key", b"value");
        batch.put(CF, b"key", b"value");
        assert_eq!(batch.size_in_bytes(), projected);

        let projected = batch.projected_size(OpKind::Delete, b"key", b"");
        batch.delete(CF, b"key");
        assert_eq!(batch.size_in_bytes(), projected);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Put(u8, Vec<u8>),
            Delete(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..8, proptest::collection::vec(any::<u8>(), 0..8))
                    .prop_map(|(k, v)| Op::Put(k, v)),
                (0u8..8).prop_map(Op::Delete),
            ]
        }

        proptest! {
            #[test]
            fn batch_lookup_matches_model(ops in proptest::collection::vec(op(), 0..64)) {
                let mut batch = WriteBatchWithIndex::new(0, true);
                let mut model: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
                for op in &ops {
                    match op {
                        Op::Put(k, v) => {
                            batch.put(CF, &[*k], v);
                            model.insert(vec![*k], Some(v.clone()));
                        }
                        Op::Delete(k) => {
                            batch.delete(CF, &[*k]);
                            model.insert(vec![*k], None);
                        }
                    }
                }

                prop_assert_eq!(batch.count(), ops.len());
                for k in 0u8..8 {
                    let expected = match model.get(&vec![k]) {
                        None => BatchLookup::NotFound,
                        Some(None) => BatchLookup::Deleted,
                        Some(Some(v)) => BatchLookup::Found(v.clone()),
                    };
                    prop_assert_eq!(batch.get_from_batch(CF, &[k]).unwrap(), expected);
                }

                let iterated: Vec<Vec<u8>> = batch.iter().map(|r| r.key.to_vec()).collect();
                let model_keys: Vec<Vec<u8>> = model.keys().cloned().collect();
                prop_assert_eq!(iterated, model_keys);
            }
        }
    }
}
