//! Immutable table files produced by flush
//!
//! # Format
//!
//! ```text
//! +--------------------+
//! | Magic: "STBL"      | 4 bytes
//! | Format Version     | 4 bytes (u32 LE)
//! | Entry Count        | 8 bytes (u64 LE)
//! | Entries ...        |
//! | CRC32              | 4 bytes, over everything above
//! +--------------------+
//!
//! Entry: [cf: u32][seq: u64][kind: u8][key_len: u32][key][val_len: u32][value]
//! ```
//!
//! Every version is stored, deletes and merge operands included, so a
//! table replays exactly like the WAL records it replaced.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use strata_core::{ColumnFamilyId, OpKind, SequenceNumber, StrataError};

/// Table magic bytes: "STBL"
pub const TABLE_MAGIC: [u8; 4] = *b"STBL";

/// Current table format version
pub const TABLE_FORMAT_VERSION: u32 = 1;

const HEADER_SIZE: usize = 16;

/// One stored version of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Column family
    pub cf: ColumnFamilyId,
    /// Key bytes
    pub key: Vec<u8>,
    /// Sequence of the write
    pub seq: SequenceNumber,
    /// Put, Delete or Merge
    pub kind: OpKind,
    /// Value or merge operand (empty for deletes)
    pub value: Vec<u8>,
}

/// Errors reading a table file
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// File smaller than header plus checksum
    #[error("table file too short")]
    TooShort,

    /// Invalid magic bytes
    #[error("invalid table magic")]
    InvalidMagic,

    /// Unknown format version
    #[error("unsupported table format version {0}")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("table checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// CRC stored in the file
        expected: u32,
        /// CRC computed over the file
        computed: u32,
    },

    /// Entry could not be decoded
    #[error("malformed table entry at offset {offset}")]
    Malformed {
        /// Byte offset of the entry
        offset: usize,
    },

    /// IO error
    #[error("table I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<TableError> for StrataError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Io(io) => StrataError::Io(io),
            other => StrataError::corruption(other.to_string()),
        }
    }
}

/// Serialize `entries` into table bytes
pub fn encode_table(entries: &[TableEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + entries.len() * 32);
    bytes.extend_from_slice(&TABLE_MAGIC);
    bytes.extend_from_slice(&TABLE_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        bytes.extend_from_slice(&entry.cf.0.to_le_bytes());
        bytes.extend_from_slice(&entry.seq.to_le_bytes());
        bytes.push(entry.kind.tag());
        bytes.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&entry.key);
        bytes.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&entry.value);
    }
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

/// Parse table bytes
pub fn decode_table(bytes: &[u8]) -> Result<Vec<TableEntry>, TableError> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(TableError::TooShort);
    }
    if bytes[0..4] != TABLE_MAGIC {
        return Err(TableError::InvalidMagic);
    }
    let body = &bytes[..bytes.len() - 4];
    let expected = LittleEndian::read_u32(&bytes[bytes.len() - 4..]);
    let computed = crc32fast::hash(body);
    if expected != computed {
        return Err(TableError::ChecksumMismatch { expected, computed });
    }
    let version = LittleEndian::read_u32(&body[4..8]);
    if version != TABLE_FORMAT_VERSION {
        return Err(TableError::UnsupportedVersion(version));
    }
    let count = LittleEndian::read_u64(&body[8..16]) as usize;

    let mut entries = Vec::with_capacity(count.min(body.len() / 21));
    let mut pos = HEADER_SIZE;
    for _ in 0..count {
        let (entry, next) = decode_entry(body, pos).ok_or(TableError::Malformed { offset: pos })?;
        entries.push(entry);
        pos = next;
    }
    if pos != body.len() {
        return Err(TableError::Malformed { offset: pos });
    }
    Ok(entries)
}

fn decode_entry(body: &[u8], start: usize) -> Option<(TableEntry, usize)> {
    let mut pos = start;
    let cf = ColumnFamilyId(LittleEndian::read_u32(body.get(pos..pos + 4)?));
    pos += 4;
    let seq = LittleEndian::read_u64(body.get(pos..pos + 8)?);
    pos += 8;
    let kind = OpKind::from_tag(*body.get(pos)?)?;
    pos += 1;
    let key_len = LittleEndian::read_u32(body.get(pos..pos + 4)?) as usize;
    pos += 4;
    let key = body.get(pos..pos + key_len)?.to_vec();
    pos += key_len;
    let value_len = LittleEndian::read_u32(body.get(pos..pos + 4)?) as usize;
    pos += 4;
    let value = body.get(pos..pos + value_len)?.to_vec();
    pos += value_len;
    Some((
        TableEntry {
            cf,
            key,
            seq,
            kind,
            value,
        },
        pos,
    ))
}

/// Write a table file using write-fsync-rename
///
/// Returns the file size in bytes.
pub fn write_table(path: &Path, entries: &[TableEntry]) -> io::Result<u64> {
    let bytes = encode_table(entries);
    let temp_path = path.with_extension("tbl.tmp");

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)?;
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(bytes.len() as u64)
}

/// Read and validate a table file
pub fn read_table(path: &Path) -> Result<Vec<TableEntry>, TableError> {
    let bytes = std::fs::read(path)?;
    decode_table(&bytes)
}
