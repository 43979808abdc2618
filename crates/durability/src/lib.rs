//! Durability layer for Strata
//!
//! This crate handles everything that touches disk:
//!
//! - WAL: append-only log, one CRC-framed record per committed write batch
//! - Table files: immutable, checksummed output of a flush
//! - MANIFEST: column families, live tables and the active WAL
//! - Database directory layout

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod manifest;
pub mod paths;
pub mod table;
pub mod wal;

pub use encoding::{decode_record, encode_record, DecodeError, DecodedRecord};
pub use manifest::{ColumnFamilyDescriptor, Manifest, ManifestError, DEFAULT_COLUMN_FAMILY_NAME};
pub use paths::{parse_file_name, DatabasePaths, FileKind};
pub use table::{read_table, write_table, TableEntry, TableError};
pub use wal::{
    copy_wal_prefix, read_wal, ReadStopReason, WalCounters, WalReadResult, WalReaderError,
    WalWriter,
};
