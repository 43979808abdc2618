//! Write-ahead log
//!
//! One WAL file per flush generation. Each committed write batch is appended
//! as a single framed record (see [`crate::encoding`]), so a batch is either
//! fully recovered or dropped as a torn tail.
//!
//! # Recovery
//!
//! [`read_wal`] stops at the first record that is incomplete or fails its
//! checksum and reports `valid_len`. The engine truncates the file to that
//! length before appending again.
//!
//! # Failed Appends
//!
//! A failed write or fsync truncates the file back to the last acknowledged
//! record, so a failed batch never reappears on recovery and later records
//! never follow torn bytes. If that truncation fails too, the writer is
//! poisoned and refuses every further append.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use strata_core::{StrataError, WriteBatch};
use tracing::warn;

use crate::encoding::{decode_record, encode_record, DecodeError, RECORD_TYPE_WRITE_BATCH};

/// Cumulative WAL operation counters.
///
/// These counters accumulate over the lifetime of the WalWriter
/// and are never reset.
#[derive(Debug, Clone, Default)]
pub struct WalCounters {
    /// Total records appended
    pub wal_appends: u64,
    /// Total fsync calls
    pub sync_calls: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Total nanoseconds spent in fsync
    pub sync_nanos: u64,
}

/// Appends write batches to a single WAL file
pub struct WalWriter {
    file: File,
    path: PathBuf,
    number: u64,
    size: u64,
    counters: WalCounters,
    poisoned: bool,
}

impl WalWriter {
    /// Create (or truncate) WAL file `number` at `path`
    pub fn create(path: PathBuf, number: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.sync_all()?;
        Ok(WalWriter {
            file,
            path,
            number,
            size: 0,
            counters: WalCounters::default(),
            poisoned: false,
        })
    }

    /// Reopen an existing WAL, discarding everything past `valid_len`
    pub fn open_append(path: PathBuf, number: u64, valid_len: u64) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;
        Ok(WalWriter {
            file,
            path,
            number,
            size: valid_len,
            counters: WalCounters::default(),
            poisoned: false,
        })
    }

    /// Append one batch as a single record
    ///
    /// With `sync`, the record is fsynced before returning.
    ///
    /// # Errors
    ///
    /// On failure nothing of the record remains in the file. A writer
    /// that could not remove a partial record is poisoned; every later
    /// append fails.
    pub fn append(&mut self, batch: &WriteBatch, sync: bool) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("WAL {} is poisoned by an earlier failed append", self.number),
            ));
        }
        let record = encode_record(RECORD_TYPE_WRITE_BATCH, batch.data());
        let written = self.file.write_all(&record).and_then(|()| {
            if sync {
                self.sync()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            self.discard_tail();
            return Err(e);
        }
        self.size += record.len() as u64;
        self.counters.wal_appends += 1;
        self.counters.bytes_written += record.len() as u64;
        Ok(())
    }

    /// Cut the file back to the last acknowledged record
    fn discard_tail(&mut self) {
        let size = self.size;
        let restored = self
            .file
            .set_len(size)
            .and_then(|()| self.file.seek(SeekFrom::Start(size)).map(|_| ()));
        if let Err(e) = restored {
            self.poisoned = true;
            warn!(
                target: "strata::storage",
                wal = self.number,
                error = %e,
                "Could not discard failed WAL append; refusing further writes"
            );
        }
    }

    /// True once a failed append could not be undone
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// fsync the WAL file
    pub fn sync(&mut self) -> io::Result<()> {
        let start = Instant::now();
        self.file.sync_data()?;
        self.counters.sync_calls += 1;
        self.counters.sync_nanos += start.elapsed().as_nanos() as u64;
        Ok(())
    }

    /// Bytes of valid records written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// File number of this WAL
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path of this WAL
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the cumulative counters
    pub fn counters(&self) -> WalCounters {
        self.counters.clone()
    }
}

/// Why reading a WAL stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// All bytes formed complete records
    EndOfData,
    /// The file ends inside a record
    PartialRecord {
        /// Offset of the torn record
        offset: u64,
    },
    /// A record failed validation
    Corrupted {
        /// Offset of the bad record
        offset: u64,
        /// What failed
        detail: String,
    },
}

/// Result of scanning a WAL file
#[derive(Debug)]
pub struct WalReadResult {
    /// Recovered batches in append order
    pub batches: Vec<WriteBatch>,
    /// Length of the valid prefix in bytes
    pub valid_len: u64,
    /// Why the scan stopped
    pub stop_reason: ReadStopReason,
}

/// Errors reading a WAL file
#[derive(Debug, thiserror::Error)]
pub enum WalReaderError {
    /// I/O failure
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<WalReaderError> for StrataError {
    fn from(e: WalReaderError) -> Self {
        match e {
            WalReaderError::Io(io) => StrataError::Io(io),
        }
    }
}

/// Read every complete, checksummed batch from the WAL at `path`
pub fn read_wal(path: &Path) -> Result<WalReadResult, WalReaderError> {
    let mut buffer = Vec::new();
    File::open(path)?.read_to_end(&mut buffer)?;

    let mut batches = Vec::new();
    let mut offset = 0usize;
    let mut stop_reason = ReadStopReason::EndOfData;

    while offset < buffer.len() {
        let record = match decode_record(&buffer[offset..], offset as u64) {
            Ok(record) => record,
            Err(DecodeError::Incomplete { .. }) => {
                stop_reason = ReadStopReason::PartialRecord {
                    offset: offset as u64,
                };
                break;
            }
            Err(e) => {
                stop_reason = ReadStopReason::Corrupted {
                    offset: offset as u64,
                    detail: e.to_string(),
                };
                break;
            }
        };

        if record.record_type != RECORD_TYPE_WRITE_BATCH {
            stop_reason = ReadStopReason::Corrupted {
                offset: offset as u64,
                detail: format!("unknown record type {}", record.record_type),
            };
            break;
        }
        match WriteBatch::from_bytes(record.payload.to_vec()) {
            Ok(batch) => batches.push(batch),
            Err(e) => {
                stop_reason = ReadStopReason::Corrupted {
                    offset: offset as u64,
                    detail: e.to_string(),
                };
                break;
            }
        }
        offset += record.consumed;
    }

    if stop_reason != ReadStopReason::EndOfData {
        warn!(
            target: "strata::storage",
            path = %path.display(),
            valid_len = offset,
            file_len = buffer.len(),
            reason = ?stop_reason,
            "Discarding WAL tail"
        );
    }

    Ok(WalReadResult {
        batches,
        valid_len: offset as u64,
        stop_reason,
    })
}

/// Copy the first `len` bytes of the WAL at `src` to a new file `dst`
pub fn copy_wal_prefix(src: &Path, dst: &Path, len: u64) -> io::Result<()> {
    let mut input = File::open(src)?.take(len);
    let mut output = OpenOptions::new().create_new(true).write(true).open(dst)?;
    let copied = io::copy(&mut input, &mut output)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("WAL shorter than expected: copied {copied} of {len} bytes"),
        ));
    }
    output.sync_all()
}
