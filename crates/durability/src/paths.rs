//! Database directory structure
//!
//! A database is a portable directory containing all state:
//!
//! ```text
//! db/
//! ├── MANIFEST      # Column families, live tables, active WAL
//! ├── LOCK          # Advisory process lock
//! ├── 000003.tbl    # Immutable flushed table
//! └── 000004.log    # Active write-ahead log
//! ```

use std::path::{Path, PathBuf};

/// Kind of a numbered database file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Write-ahead log (`NNNNNN.log`)
    Wal,
    /// Flushed table (`NNNNNN.tbl`)
    Table,
}

/// Database directory paths
#[derive(Debug, Clone)]
pub struct DatabasePaths {
    root: PathBuf,
}

impl DatabasePaths {
    /// Create paths from root directory
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        DatabasePaths {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root database directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// MANIFEST file path
    pub fn manifest(&self) -> PathBuf {
        self.root.join("MANIFEST")
    }

    /// LOCK file path
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("LOCK")
    }

    /// Path of WAL file `number`
    pub fn wal_file(&self, number: u64) -> PathBuf {
        self.root.join(file_name(number, FileKind::Wal))
    }

    /// Path of table file `number`
    pub fn table_file(&self, number: u64) -> PathBuf {
        self.root.join(file_name(number, FileKind::Table))
    }

    /// A database exists if the MANIFEST file is present
    pub fn exists(&self) -> bool {
        self.manifest().exists()
    }

    /// Create the root directory
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

/// File name for a numbered database file
pub fn file_name(number: u64, kind: FileKind) -> String {
    match kind {
        FileKind::Wal => format!("{:06}.log", number),
        FileKind::Table => format!("{:06}.tbl", number),
    }
}

/// Parse `NNNNNN.log` / `NNNNNN.tbl`
pub fn parse_file_name(name: &str) -> Option<(u64, FileKind)> {
    let (stem, ext) = name.split_once('.')?;
    let kind = match ext {
        "log" => FileKind::Wal,
        "tbl" => FileKind::Table,
        _ => return None,
    };
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((stem.parse().ok()?, kind))
}
