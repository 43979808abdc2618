//! Core types for Strata
//!
//! - ColumnFamilyId: independent keyspace identifier
//! - SequenceNumber: logical time assigned to every committed mutation
//! - TxnId: transaction identity
//! - WriteBatch: ordered mutation list with a stable binary representation
//!
//! ## WriteBatch Format
//!
//! ```text
//! [sequence: u64][count: u32]                      header, 12 bytes
//! [tag: u8][cf: u32][key_len: u32][key]            Delete
//! [tag: u8][cf: u32][key_len: u32][key][val_len: u32][value]   Put / Merge
//! ```
//!
//! All integers are little-endian. The same bytes are used as the WAL payload.

use crate::error::{StrataError, StrataResult};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical time of a committed mutation
pub type SequenceNumber = u64;

/// Transaction identity
pub type TxnId = u64;

/// Size of the fixed WriteBatch header
pub const WRITE_BATCH_HEADER_SIZE: usize = 12;

/// Identifier of a column family
///
/// The default column family always exists and has id 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ColumnFamilyId(pub u32);

impl ColumnFamilyId {
    /// The default column family
    pub const DEFAULT: ColumnFamilyId = ColumnFamilyId(0);

    /// Raw id
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ColumnFamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cf{}", self.0)
    }
}

/// Kind of a buffered mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Set key to value
    Put,
    /// Remove key
    Delete,
    /// Combine value with the existing value through the merge operator
    Merge,
}

impl OpKind {
    /// Record tag in the serialized form
    pub fn tag(self) -> u8 {
        match self {
            OpKind::Put => 1,
            OpKind::Delete => 2,
            OpKind::Merge => 3,
        }
    }

    /// Parse a record tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(OpKind::Put),
            2 => Some(OpKind::Delete),
            3 => Some(OpKind::Merge),
            _ => None,
        }
    }
}

/// Durability options for a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteOptions {
    /// fsync the WAL before acknowledging the write
    #[serde(default)]
    pub sync: bool,
    /// Skip the WAL entirely; data survives only if flushed before a crash
    #[serde(default)]
    pub disable_wal: bool,
}

/// A decoded record borrowed from a WriteBatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRecord<'a> {
    /// Mutation kind
    pub kind: OpKind,
    /// Column family
    pub cf: ColumnFamilyId,
    /// Key bytes
    pub key: &'a [u8],
    /// Value bytes (empty for deletes)
    pub value: &'a [u8],
}

/// Ordered list of mutations applied atomically by the base engine
///
/// The batch is stored directly in its serialized form so that `data()`
/// is free and record offsets are stable for indexing.
#[derive(Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::with_reserved_bytes(0)
    }

    /// Create an empty batch with `reserved_bytes` of capacity
    pub fn with_reserved_bytes(reserved_bytes: usize) -> Self {
        let mut rep = Vec::with_capacity(reserved_bytes.max(WRITE_BATCH_HEADER_SIZE));
        rep.resize(WRITE_BATCH_HEADER_SIZE, 0);
        WriteBatch { rep }
    }

    /// Rebuild a batch from serialized bytes, validating every record
    pub fn from_bytes(rep: Vec<u8>) -> StrataResult<Self> {
        if rep.len() < WRITE_BATCH_HEADER_SIZE {
            return Err(StrataError::corruption(format!(
                "write batch too short: {} bytes",
                rep.len()
            )));
        }
        let declared = LittleEndian::read_u32(&rep[8..12]) as usize;
        let mut offset = WRITE_BATCH_HEADER_SIZE;
        let mut found = 0usize;
        while offset < rep.len() {
            let (_, next) = decode_record(&rep, offset).ok_or_else(|| {
                StrataError::corruption(format!("malformed write batch record at offset {offset}"))
            })?;
            offset = next;
            found += 1;
        }
        if found != declared {
            return Err(StrataError::corruption(format!(
                "write batch count mismatch: header says {declared}, found {found}"
            )));
        }
        Ok(WriteBatch { rep })
    }

    /// Buffer a put, returning the record offset
    pub fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> usize {
        self.append(OpKind::Put, cf, key, value)
    }

    /// Buffer a merge, returning the record offset
    pub fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> usize {
        self.append(OpKind::Merge, cf, key, value)
    }

    /// Buffer a delete, returning the record offset
    pub fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> usize {
        self.append(OpKind::Delete, cf, key, &[])
    }

    /// Append a record of any kind, returning its offset
    pub fn append(&mut self, kind: OpKind, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> usize {
        let offset = self.rep.len();
        self.rep.push(kind.tag());
        self.rep.extend_from_slice(&cf.0.to_le_bytes());
        self.rep.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.rep.extend_from_slice(key);
        if kind != OpKind::Delete {
            self.rep.extend_from_slice(&(value.len() as u32).to_le_bytes());
            self.rep.extend_from_slice(value);
        }
        let count = self.count() as u32 + 1;
        LittleEndian::write_u32(&mut self.rep[8..12], count);
        offset
    }

    /// Decode the record starting at `offset`
    ///
    /// Offsets come from `append`; an offset that does not start a record
    /// yields `None`.
    pub fn record_at(&self, offset: usize) -> Option<BatchRecord<'_>> {
        decode_record(&self.rep, offset).map(|(record, _)| record)
    }

    /// Iterate records in insertion order
    pub fn iter(&self) -> WriteBatchIter<'_> {
        WriteBatchIter {
            rep: &self.rep,
            offset: WRITE_BATCH_HEADER_SIZE,
        }
    }

    /// Number of buffered operations
    pub fn count(&self) -> usize {
        LittleEndian::read_u32(&self.rep[8..12]) as usize
    }

    /// True when no operation is buffered
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Sequence number stamped in the header (0 until applied)
    pub fn sequence(&self) -> SequenceNumber {
        LittleEndian::read_u64(&self.rep[0..8])
    }

    /// Stamp the header sequence number
    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        LittleEndian::write_u64(&mut self.rep[0..8], sequence);
    }

    /// Serialized form: header followed by ordered records
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    /// Size of the serialized form in bytes
    pub fn size_in_bytes(&self) -> usize {
        self.rep.len()
    }

    /// Drop every record, keeping the allocation
    pub fn clear(&mut self) {
        self.rep.truncate(WRITE_BATCH_HEADER_SIZE);
        self.rep.iter_mut().for_each(|b| *b = 0);
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBatch")
            .field("sequence", &self.sequence())
            .field("count", &self.count())
            .field("bytes", &self.rep.len())
            .finish()
    }
}

/// Iterator over the records of a WriteBatch
pub struct WriteBatchIter<'a> {
    rep: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for WriteBatchIter<'a> {
    type Item = BatchRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (record, next) = decode_record(self.rep, self.offset)?;
        self.offset = next;
        Some(record)
    }
}

fn decode_record(rep: &[u8], offset: usize) -> Option<(BatchRecord<'_>, usize)> {
    let kind = OpKind::from_tag(*rep.get(offset)?)?;
    let mut pos = offset + 1;
    let cf = ColumnFamilyId(LittleEndian::read_u32(rep.get(pos..pos + 4)?));
    pos += 4;
    let key_len = LittleEndian::read_u32(rep.get(pos..pos + 4)?) as usize;
    pos += 4;
    let key = rep.get(pos..pos + key_len)?;
    pos += key_len;
    let value: &[u8] = if kind == OpKind::Delete {
        &[]
    } else {
        let value_len = LittleEndian::read_u32(rep.get(pos..pos + 4)?) as usize;
        pos += 4;
        let value = rep.get(pos..pos + value_len)?;
        pos += value_len;
        value
    };
    Some((
        BatchRecord {
            kind,
            cf,
            key,
            value,
        },
        pos,
    ))
}
