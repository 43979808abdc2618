//! On-disk checkpoints
//!
//! A checkpoint is an independent database directory that opens to the
//! state at the moment it was taken. Table files are immutable and are
//! hard-linked when the filesystem allows it, copied otherwise. The live
//! WAL prefix is copied byte for byte.
//!
//! # Crash Safety
//!
//! 1. Build everything inside `<dir>.tmp`
//! 2. fsync the files and the temporary directory
//! 3. Atomic rename to `dir`
//! 4. fsync the parent directory
//!
//! Any failure removes the temporary directory, so `dir` either holds a
//! complete checkpoint or does not exist.

use std::fs::File;
use std::io;
use std::path::Path;

use strata_core::{StrataError, StrataResult};
use strata_durability::{copy_wal_prefix, DatabasePaths};
use tracing::{info, warn};

use crate::engine::{temp_sibling, Engine, WriteState};

impl Engine {
    /// Materialize a checkpoint of the database at `dir`
    ///
    /// When the active WAL holds at least `log_size_for_flush` bytes, every
    /// column family is flushed first so the checkpoint carries no WAL
    /// data. Zero always flushes.
    ///
    /// # Errors
    ///
    /// - `CheckpointTargetExists` if `dir` already exists
    /// - `CheckpointIo` if materialization fails
    pub fn checkpoint_to(&self, dir: &Path, log_size_for_flush: u64) -> StrataResult<()> {
        // Under the writer lock: at most one concurrent checkpoint to `dir` passes
        let mut write = self.write.lock();
        if dir.exists() {
            return Err(StrataError::CheckpointTargetExists {
                path: dir.to_path_buf(),
            });
        }
        if log_size_for_flush == 0 || write.wal.size() >= log_size_for_flush {
            self.flush_locked(&mut write)?;
        }

        let temp_dir = temp_sibling(dir);
        let result = self.materialize(&write, &temp_dir).and_then(|()| {
            std::fs::rename(&temp_dir, dir)?;
            sync_parent(dir)
        });

        match result {
            Ok(()) => {
                info!(
                    target: "strata::checkpoint",
                    path = %dir.display(),
                    tables = write.manifest.table_files.len(),
                    wal_bytes = write.wal.size(),
                    "Created checkpoint"
                );
                Ok(())
            }
            Err(source) => {
                if temp_dir.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
                        warn!(
                            target: "strata::checkpoint",
                            path = %temp_dir.display(),
                            error = %e,
                            "Failed to remove partial checkpoint"
                        );
                    }
                }
                Err(StrataError::CheckpointIo {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
    }

    fn materialize(&self, write: &WriteState, temp_dir: &Path) -> io::Result<()> {
        if temp_dir.exists() {
            std::fs::remove_dir_all(temp_dir)?;
        }
        std::fs::create_dir_all(temp_dir)?;
        let target = DatabasePaths::from_root(temp_dir);

        for number in &write.manifest.table_files {
            link_or_copy(&self.paths.table_file(*number), &target.table_file(*number))?;
        }
        copy_wal_prefix(
            &self.paths.wal_file(write.manifest.wal_number),
            &target.wal_file(write.manifest.wal_number),
            write.wal.size(),
        )?;
        write
            .manifest
            .persist(&target.manifest())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        File::open(temp_dir)?.sync_all()
    }
}

fn link_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    if std::fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    File::open(dst)?.sync_all()
}

fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}
