//! MANIFEST file format
//!
//! MANIFEST lists the physical state of a database directory: column
//! families, live table files and the active WAL. Rewritten whole on every
//! change using write-fsync-rename.
//!
//! # Format
//!
//! ```text
//! +----------------------+
//! | Magic: "STRM"        | 4 bytes
//! | Format Version       | 4 bytes (u32 LE)
//! | Active WAL Number    | 8 bytes (u64 LE)
//! | Last Flushed Seq     | 8 bytes (u64 LE)
//! | Next File Number     | 8 bytes (u64 LE)
//! | CF Count             | 4 bytes (u32 LE)
//! |   [id u32][len u32][name]
//! | Table Count          | 4 bytes (u32 LE)
//! |   [number u64]
//! | CRC32                | 4 bytes
//! +----------------------+
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use strata_core::{ColumnFamilyId, SequenceNumber, StrataError};

/// MANIFEST magic bytes: "STRM" (0x5354524D)
pub const MANIFEST_MAGIC: [u8; 4] = *b"STRM";

/// Current MANIFEST format version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Name of the column family that always exists
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

const FIXED_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 8;

/// A named column family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilyDescriptor {
    /// Stable id
    pub id: ColumnFamilyId,
    /// Unique name
    pub name: String,
}

/// MANIFEST contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Number of the WAL receiving new writes
    pub wal_number: u64,
    /// Every sequence at or below this lives in a table file
    pub last_flushed_sequence: SequenceNumber,
    /// Next unused file number
    pub next_file_number: u64,
    /// Column families, default first
    pub column_families: Vec<ColumnFamilyDescriptor>,
    /// Live table files, oldest first
    pub table_files: Vec<u64>,
}

impl Manifest {
    /// MANIFEST for a fresh database: default column family, WAL 1
    pub fn new() -> Self {
        Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            wal_number: 1,
            last_flushed_sequence: 0,
            next_file_number: 2,
            column_families: vec![ColumnFamilyDescriptor {
                id: ColumnFamilyId::DEFAULT,
                name: DEFAULT_COLUMN_FAMILY_NAME.to_string(),
            }],
            table_files: Vec::new(),
        }
    }

    /// Serialize MANIFEST to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MANIFEST_MAGIC);
        bytes.extend_from_slice(&self.format_version.to_le_bytes());
        bytes.extend_from_slice(&self.wal_number.to_le_bytes());
        bytes.extend_from_slice(&self.last_flushed_sequence.to_le_bytes());
        bytes.extend_from_slice(&self.next_file_number.to_le_bytes());

        bytes.extend_from_slice(&(self.column_families.len() as u32).to_le_bytes());
        for cf in &self.column_families {
            bytes.extend_from_slice(&cf.id.0.to_le_bytes());
            bytes.extend_from_slice(&(cf.name.len() as u32).to_le_bytes());
            bytes.extend_from_slice(cf.name.as_bytes());
        }

        bytes.extend_from_slice(&(self.table_files.len() as u32).to_le_bytes());
        for number in &self.table_files {
            bytes.extend_from_slice(&number.to_le_bytes());
        }

        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Deserialize MANIFEST from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        if bytes.len() < FIXED_HEADER_SIZE + 4 + 4 + 4 {
            return Err(ManifestError::TooShort);
        }
        if bytes[0..4] != MANIFEST_MAGIC {
            return Err(ManifestError::InvalidMagic);
        }

        let data = &bytes[..bytes.len() - 4];
        let stored_crc = LittleEndian::read_u32(&bytes[bytes.len() - 4..]);
        let computed_crc = crc32fast::hash(data);
        if stored_crc != computed_crc {
            return Err(ManifestError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let format_version = LittleEndian::read_u32(&data[4..8]);
        if format_version != MANIFEST_FORMAT_VERSION {
            return Err(ManifestError::UnsupportedVersion(format_version));
        }
        let wal_number = LittleEndian::read_u64(&data[8..16]);
        let last_flushed_sequence = LittleEndian::read_u64(&data[16..24]);
        let next_file_number = LittleEndian::read_u64(&data[24..32]);

        let mut cursor = FIXED_HEADER_SIZE;
        let cf_count = read_u32(data, &mut cursor)? as usize;
        let mut column_families = Vec::with_capacity(cf_count.min(1024));
        for _ in 0..cf_count {
            let id = ColumnFamilyId(read_u32(data, &mut cursor)?);
            let name_len = read_u32(data, &mut cursor)? as usize;
            let name_bytes = data
                .get(cursor..cursor + name_len)
                .ok_or(ManifestError::TooShort)?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| ManifestError::InvalidColumnFamilyName)?;
            cursor += name_len;
            column_families.push(ColumnFamilyDescriptor { id, name });
        }

        let table_count = read_u32(data, &mut cursor)? as usize;
        let mut table_files = Vec::with_capacity(table_count.min(1024));
        for _ in 0..table_count {
            let slice = data.get(cursor..cursor + 8).ok_or(ManifestError::TooShort)?;
            table_files.push(LittleEndian::read_u64(slice));
            cursor += 8;
        }

        Ok(Manifest {
            format_version,
            wal_number,
            last_flushed_sequence,
            next_file_number,
            column_families,
            table_files,
        })
    }

    /// Load and validate the MANIFEST at `path`
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Persist MANIFEST atomically (write-fsync-rename)
    pub fn persist(&self, path: &Path) -> Result<(), ManifestError> {
        let temp_path = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&self.to_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, path)?;

        if let Some(parent) = path.parent() {
            if parent.exists() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }

    /// Reserve the next file number
    pub fn allocate_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Look up a column family by name
    pub fn column_family(&self, name: &str) -> Option<&ColumnFamilyDescriptor> {
        self.column_families.iter().find(|cf| cf.name == name)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32, ManifestError> {
    let slice = data
        .get(*cursor..*cursor + 4)
        .ok_or(ManifestError::TooShort)?;
    *cursor += 4;
    Ok(LittleEndian::read_u32(slice))
}

/// Errors that can occur with MANIFEST operations
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// MANIFEST file too short
    #[error("MANIFEST too short")]
    TooShort,

    /// Invalid magic bytes
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unknown format version
    #[error("Unsupported MANIFEST format version {0}")]
    UnsupportedVersion(u32),

    /// Column family name is not valid UTF-8
    #[error("Invalid column family name")]
    InvalidColumnFamilyName,

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected CRC32 value (from file)
        expected: u32,
        /// Computed CRC32 value
        computed: u32,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ManifestError> for StrataError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::Io(io) => StrataError::Io(io),
            other => StrataError::corruption(format!("MANIFEST: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.column_families.push(ColumnFamilyDescriptor {
            id: ColumnFamilyId(1),
            name: "accounts".to_string(),
        });
        manifest.table_files = vec![3, 5];
        manifest.wal_number = 6;
        manifest.last_flushed_sequence = 40;
        manifest.next_file_number = 7;
        manifest
    }

    #[test]
    fn test_manifest_magic() {
        assert_eq!(u32::from_be_bytes(MANIFEST_MAGIC), 0x5354524D);
    }

    #[test]
    fn test_manifest_new() {
        let manifest = Manifest::new();
        assert_eq!(manifest.wal_number, 1);
        assert_eq!(manifest.column_families.len(), 1);
        assert_eq!(
            manifest.column_family("default").map(|cf| cf.id),
            Some(ColumnFamilyId::DEFAULT)
        );
        assert!(manifest.table_files.is_empty());
    }

    #[test]
    fn test_bytes_preserve_every_field() {
        let manifest = sample();
        let parsed = Manifest::from_bytes(&manifest.to_bytes()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample().to_bytes();
        bytes[10] ^= 0xFF;
        assert!(matches!(
            Manifest::from_bytes(&bytes),
            Err(ManifestError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            Manifest::from_bytes(b"STRM"),
            Err(ManifestError::TooShort)
        ));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MANIFEST");
        sample().persist(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), sample());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_allocate_file_number() {
        let mut manifest = Manifest::new();
        assert_eq!(manifest.allocate_file_number(), 2);
        assert_eq!(manifest.allocate_file_number(), 3);
        assert_eq!(manifest.next_file_number, 4);
    }
}
