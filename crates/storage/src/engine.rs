//! Engine: the base ordered key/value store
//!
//! # Write Path
//!
//! Writers serialize on `write` (the WAL mutex). Under it a batch is stamped
//! with consecutive sequence numbers, appended to the WAL as one record and
//! applied to the per-column-family version chains. `last_sequence` is
//! published while the state write lock is still held, so a reader sees all
//! of a batch or none of it.
//!
//! # Read Path
//!
//! Reads take the state read lock and resolve the newest version at or
//! below the requested sequence. Snapshots pin a sequence number; nothing
//! is copied.
//!
//! # Lock Order
//!
//! `write` → `state`. The snapshot registry is a leaf lock.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strata_core::{
    ColumnFamilyId, ConcatMergeOperator, MergeOperator, SequenceNumber, Storage,
    StrataError, StrataResult, WriteBatch, WriteOptions,
};
use strata_durability::{
    parse_file_name, read_table, read_wal, write_table, ColumnFamilyDescriptor, DatabasePaths,
    FileKind, Manifest, TableEntry, WalWriter,
};
use tracing::{debug, info, warn};

use crate::config::EngineOptions;
use crate::memtable::ColumnFamilyTable;

/// Column families and their version chains
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) tables: HashMap<ColumnFamilyId, ColumnFamilyTable>,
    pub(crate) names: BTreeMap<String, ColumnFamilyId>,
}

/// State owned by the single active writer
pub(crate) struct WriteState {
    pub(crate) wal: WalWriter,
    pub(crate) manifest: Manifest,
}

/// Base engine backed by a directory
///
/// Implements [`Storage`]; share it as `Arc<Engine>`.
pub struct Engine {
    pub(crate) paths: DatabasePaths,
    options: EngineOptions,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) write: Mutex<WriteState>,
    last_sequence: AtomicU64,
    snapshots: Mutex<BTreeMap<SequenceNumber, usize>>,
    merge_operator: Arc<dyn MergeOperator>,
    _lock_file: File,
}

impl Engine {
    /// Open (or create) the database at `path` with the concatenating merge operator
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> StrataResult<Self> {
        Self::open_with_merge_operator(path, options, Arc::new(ConcatMergeOperator::new()))
    }

    /// Open (or create) the database at `path`
    ///
    /// Recovery loads every table listed in the MANIFEST, then replays the
    /// active WAL. A torn WAL tail is truncated.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the database is missing and `create_if_missing`
    ///   is false, or exists and `error_if_exists` is true
    /// - `Storage` if another process holds the directory lock
    /// - `Corruption` / `Io` from recovery
    pub fn open_with_merge_operator(
        path: impl AsRef<Path>,
        options: EngineOptions,
        merge_operator: Arc<dyn MergeOperator>,
    ) -> StrataResult<Self> {
        let paths = DatabasePaths::from_root(path);
        let exists = paths.exists();
        if !exists && !options.create_if_missing {
            return Err(StrataError::invalid_input(format!(
                "database '{}' does not exist",
                paths.root().display()
            )));
        }
        if exists && options.error_if_exists {
            return Err(StrataError::invalid_input(format!(
                "database '{}' already exists",
                paths.root().display()
            )));
        }
        paths.create_directories()?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(paths.lock_file())
            .map_err(|e| StrataError::storage(format!("failed to open lock file: {}", e)))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            StrataError::storage(format!(
                "database at '{}' is already in use by another process",
                paths.root().display()
            ))
        })?;

        let (state, write, last_sequence) = if exists {
            Self::recover(&paths)?
        } else {
            Self::create_new(&paths)?
        };

        let engine = Engine {
            paths,
            options,
            state: RwLock::new(state),
            write: Mutex::new(write),
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Mutex::new(BTreeMap::new()),
            merge_operator,
            _lock_file: lock_file,
        };
        engine.remove_obsolete_files();
        engine.prune_versions(last_sequence);
        Ok(engine)
    }

    fn create_new(paths: &DatabasePaths) -> StrataResult<(EngineState, WriteState, u64)> {
        let manifest = Manifest::new();
        let wal = WalWriter::create(paths.wal_file(manifest.wal_number), manifest.wal_number)?;
        manifest.persist(&paths.manifest())?;

        let mut state = EngineState::default();
        for cf in &manifest.column_families {
            state.tables.insert(cf.id, ColumnFamilyTable::new());
            state.names.insert(cf.name.clone(), cf.id);
        }
        info!(target: "strata::storage", path = %paths.root().display(), "Created database");
        Ok((state, WriteState { wal, manifest }, 0))
    }

    fn recover(paths: &DatabasePaths) -> StrataResult<(EngineState, WriteState, u64)> {
        let manifest = Manifest::load(&paths.manifest())?;

        let mut state = EngineState::default();
        for cf in &manifest.column_families {
            state.tables.insert(cf.id, ColumnFamilyTable::new());
            state.names.insert(cf.name.clone(), cf.id);
        }

        let mut last_sequence = manifest.last_flushed_sequence;
        let mut table_entries = 0usize;
        for number in &manifest.table_files {
            for entry in read_table(&paths.table_file(*number))? {
                let table = state.tables.get_mut(&entry.cf).ok_or_else(|| {
                    StrataError::corruption(format!(
                        "table {number} references unknown column family {}",
                        entry.cf
                    ))
                })?;
                table.insert(&entry.key, entry.seq, entry.kind, &entry.value);
                last_sequence = last_sequence.max(entry.seq);
                table_entries += 1;
            }
        }

        let wal_path = paths.wal_file(manifest.wal_number);
        let (wal, batches_replayed) = if wal_path.exists() {
            let result = read_wal(&wal_path)?;
            let replayed = result.batches.len();
            for batch in &result.batches {
                let first = batch.sequence();
                for (i, record) in batch.iter().enumerate() {
                    let table = state.tables.get_mut(&record.cf).ok_or_else(|| {
                        StrataError::corruption(format!(
                            "WAL record references unknown column family {}",
                            record.cf
                        ))
                    })?;
                    let seq = first + i as u64;
                    table.insert(record.key, seq, record.kind, record.value);
                    last_sequence = last_sequence.max(seq);
                }
            }
            let wal = WalWriter::open_append(wal_path, manifest.wal_number, result.valid_len)?;
            (wal, replayed)
        } else {
            warn!(
                target: "strata::storage",
                wal = manifest.wal_number,
                "Active WAL missing, starting an empty one"
            );
            (WalWriter::create(wal_path, manifest.wal_number)?, 0)
        };

        info!(
            target: "strata::storage",
            path = %paths.root().display(),
            tables = manifest.table_files.len(),
            table_entries,
            batches_replayed,
            last_sequence,
            "Recovery complete"
        );
        Ok((state, WriteState { wal, manifest }, last_sequence))
    }

    /// Delete files no longer referenced by the MANIFEST
    fn remove_obsolete_files(&self) {
        let write = self.write.lock();
        let entries = match std::fs::read_dir(self.paths.root()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target: "strata::storage", error = %e, "Failed to list database directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let obsolete = match parse_file_name(&name) {
                Some((number, FileKind::Wal)) => number != write.manifest.wal_number,
                Some((number, FileKind::Table)) => !write.manifest.table_files.contains(&number),
                None => name.ends_with(".tmp"),
            };
            if obsolete {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => debug!(target: "strata::storage", file = %name, "Removed obsolete file"),
                    Err(e) => warn!(target: "strata::storage", file = %name, error = %e, "Failed to remove obsolete file"),
                }
            }
        }
    }

    /// Root directory of the database
    pub fn path(&self) -> &Path {
        self.paths.root()
    }

    /// Options the engine was opened with
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Create a column family named `name`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the name is empty or already taken.
    pub fn create_column_family(&self, name: &str) -> StrataResult<ColumnFamilyId> {
        if name.is_empty() {
            return Err(StrataError::invalid_input("column family name is empty"));
        }
        let mut write = self.write.lock();
        if write.manifest.column_family(name).is_some() {
            return Err(StrataError::invalid_input(format!(
                "column family '{name}' already exists"
            )));
        }
        let next_id = write
            .manifest
            .column_families
            .iter()
            .map(|cf| cf.id.0)
            .max()
            .unwrap_or(0)
            + 1;
        let id = ColumnFamilyId(next_id);

        let mut manifest = write.manifest.clone();
        manifest.column_families.push(ColumnFamilyDescriptor {
            id,
            name: name.to_string(),
        });
        manifest.persist(&self.paths.manifest())?;
        write.manifest = manifest;

        let mut state = self.state.write();
        state.tables.insert(id, ColumnFamilyTable::new());
        state.names.insert(name.to_string(), id);
        info!(target: "strata::storage", name, id = id.0, "Created column family");
        Ok(id)
    }

    /// Look up a column family by name
    pub fn column_family(&self, name: &str) -> Option<ColumnFamilyId> {
        self.state.read().names.get(name).copied()
    }

    /// All column families as `(name, id)`, ordered by name
    pub fn column_families(&self) -> Vec<(String, ColumnFamilyId)> {
        self.state
            .read()
            .names
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    /// Write a single put
    pub fn put(
        &self,
        options: &WriteOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &[u8],
    ) -> StrataResult<SequenceNumber> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key, value);
        self.write(&batch, options)
    }

    /// Write a single delete
    pub fn delete(
        &self,
        options: &WriteOptions,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<SequenceNumber> {
        let mut batch = WriteBatch::new();
        batch.delete(cf, key);
        self.write(&batch, options)
    }

    /// Write a single merge operand
    pub fn merge(
        &self,
        options: &WriteOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &[u8],
    ) -> StrataResult<SequenceNumber> {
        let mut batch = WriteBatch::new();
        batch.merge(cf, key, value);
        self.write(&batch, options)
    }

    /// Flush every column family to a new table file and rotate the WAL
    pub fn flush(&self) -> StrataResult<()> {
        let mut write = self.write.lock();
        self.flush_locked(&mut write)
    }

    /// Flush while holding the writer lock
    pub(crate) fn flush_locked(&self, write: &mut WriteState) -> StrataResult<()> {
        let flushed_upto = self.last_sequence.load(Ordering::Acquire);
        let since = write.manifest.last_flushed_sequence;
        if flushed_upto == since && write.wal.size() == 0 {
            return Ok(());
        }

        let entries: Vec<TableEntry> = {
            let state = self.state.read();
            let mut cfs: Vec<_> = state.tables.iter().collect();
            cfs.sort_by_key(|(id, _)| **id);
            cfs.into_iter()
                .flat_map(|(cf, table)| {
                    table.versions_after(since).map(move |(key, v)| TableEntry {
                        cf: *cf,
                        key: key.to_vec(),
                        seq: v.seq,
                        kind: v.kind,
                        value: v.value.clone(),
                    })
                })
                .collect()
        };

        let mut manifest = write.manifest.clone();
        if !entries.is_empty() {
            let number = manifest.allocate_file_number();
            write_table(&self.paths.table_file(number), &entries)?;
            manifest.table_files.push(number);
        }
        let wal_number = manifest.allocate_file_number();
        let new_wal = WalWriter::create(self.paths.wal_file(wal_number), wal_number)?;
        let old_wal = write.manifest.wal_number;
        manifest.wal_number = wal_number;
        manifest.last_flushed_sequence = flushed_upto;
        manifest.persist(&self.paths.manifest())?;

        write.manifest = manifest;
        write.wal = new_wal;
        if let Err(e) = std::fs::remove_file(self.paths.wal_file(old_wal)) {
            warn!(target: "strata::storage", wal = old_wal, error = %e, "Failed to remove flushed WAL");
        }

        let pruned = self.prune_versions(self.prune_horizon());
        info!(
            target: "strata::storage",
            entries = entries.len(),
            pruned,
            last_flushed_sequence = flushed_upto,
            wal = wal_number,
            "Flushed column families"
        );
        Ok(())
    }

    /// Oldest sequence any current or future reader can ask for
    ///
    /// Read under the snapshot mutex so a snapshot being acquired either
    /// shows up here or pins a sequence at or above the result.
    fn prune_horizon(&self) -> SequenceNumber {
        let snapshots = self.snapshots.lock();
        let latest = self.last_sequence.load(Ordering::Acquire);
        snapshots
            .keys()
            .next()
            .map_or(latest, |oldest| (*oldest).min(latest))
    }

    /// Collapse in-memory history below `horizon`; returns versions dropped
    fn prune_versions(&self, horizon: SequenceNumber) -> usize {
        let mut state = self.state.write();
        let mut dropped = 0;
        for (cf, table) in state.tables.iter_mut() {
            match table.prune(horizon, self.merge_operator.as_ref()) {
                Ok(n) => dropped += n,
                Err(e) => warn!(
                    target: "strata::storage",
                    %cf,
                    error = %e,
                    "Version pruning stopped early"
                ),
            }
        }
        dropped
    }

    /// Versions of `key` held in memory
    pub fn version_count(&self, cf: ColumnFamilyId, key: &[u8]) -> usize {
        self.state
            .read()
            .tables
            .get(&cf)
            .map(|t| t.version_count(key))
            .unwrap_or(0)
    }

    /// Size of the active WAL in bytes
    pub fn wal_size(&self) -> u64 {
        self.write.lock().wal.size()
    }

    /// Number of live table files
    pub fn table_file_count(&self) -> usize {
        self.write.lock().manifest.table_files.len()
    }

    /// Number of outstanding snapshot pins
    pub fn live_snapshot_count(&self) -> usize {
        self.snapshots.lock().values().sum()
    }

    /// Oldest pinned sequence, if any snapshot is live
    pub fn oldest_snapshot(&self) -> Option<SequenceNumber> {
        self.snapshots.lock().keys().next().copied()
    }

    fn apply_locked(
        &self,
        write: &mut WriteState,
        batch: &WriteBatch,
        options: &WriteOptions,
    ) -> StrataResult<SequenceNumber> {
        {
            let state = self.state.read();
            if let Some(record) = batch.iter().find(|r| !state.tables.contains_key(&r.cf)) {
                return Err(StrataError::invalid_input(format!(
                    "unknown column family {}",
                    record.cf
                )));
            }
        }

        let first = self.last_sequence.load(Ordering::Acquire) + 1;
        let last = first + batch.count() as u64 - 1;
        let mut stamped = batch.clone();
        stamped.set_sequence(first);

        if !options.disable_wal {
            write.wal.append(&stamped, options.sync)?;
        }

        let mut state = self.state.write();
        for (i, record) in stamped.iter().enumerate() {
            if let Some(table) = state.tables.get_mut(&record.cf) {
                table.insert(record.key, first + i as u64, record.kind, record.value);
            }
        }
        self.last_sequence.store(last, Ordering::Release);
        Ok(last)
    }
}

impl Storage for Engine {
    fn get(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
        read_seq: Option<SequenceNumber>,
    ) -> StrataResult<Option<Vec<u8>>> {
        let state = self.state.read();
        let seq = read_seq.unwrap_or_else(|| self.last_sequence.load(Ordering::Acquire));
        let table = state
            .tables
            .get(&cf)
            .ok_or_else(|| StrataError::invalid_input(format!("unknown column family {cf}")))?;
        table.get(key, seq, self.merge_operator.as_ref())
    }

    fn latest_sequence(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<SequenceNumber>> {
        let state = self.state.read();
        let table = state
            .tables
            .get(&cf)
            .ok_or_else(|| StrataError::invalid_input(format!("unknown column family {cf}")))?;
        Ok(table.latest_sequence(key))
    }

    fn scan(
        &self,
        cf: ColumnFamilyId,
        read_seq: Option<SequenceNumber>,
    ) -> StrataResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read();
        let seq = read_seq.unwrap_or_else(|| self.last_sequence.load(Ordering::Acquire));
        let table = state
            .tables
            .get(&cf)
            .ok_or_else(|| StrataError::invalid_input(format!("unknown column family {cf}")))?;
        table.scan(seq, self.merge_operator.as_ref())
    }

    fn write_with_precondition(
        &self,
        batch: &WriteBatch,
        options: &WriteOptions,
        precondition: &dyn Fn() -> StrataResult<()>,
    ) -> StrataResult<SequenceNumber> {
        let mut write = self.write.lock();
        precondition()?;
        if batch.is_empty() {
            return Ok(self.last_sequence.load(Ordering::Acquire));
        }

        let last = self.apply_locked(&mut write, batch, options)?;
        debug!(
            target: "strata::storage",
            count = batch.count(),
            last_sequence = last,
            "Applied write batch"
        );

        let threshold = self.options.write_buffer_size;
        if threshold > 0 && write.wal.size() >= threshold {
            // Already applied; the flush is retried on the next write
            if let Err(e) = self.flush_locked(&mut write) {
                warn!(target: "strata::storage", error = %e, "Automatic flush failed");
            }
        }
        Ok(last)
    }

    fn current_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::Acquire)
    }

    fn acquire_snapshot(&self) -> SequenceNumber {
        let mut snapshots = self.snapshots.lock();
        let seq = self.last_sequence.load(Ordering::Acquire);
        *snapshots.entry(seq).or_insert(0) += 1;
        seq
    }

    fn release_snapshot(&self, seq: SequenceNumber) {
        let mut snapshots = self.snapshots.lock();
        match snapshots.get_mut(&seq) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                snapshots.remove(&seq);
            }
            None => warn!(target: "strata::storage", seq, "Release of unknown snapshot"),
        }
    }

    fn merge_operator(&self) -> Arc<dyn MergeOperator> {
        Arc::clone(&self.merge_operator)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.write.get_mut().wal.sync() {
            warn!(target: "strata::storage", error = %e, "Failed to sync WAL on close");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.paths.root())
            .field("last_sequence", &self.last_sequence.load(Ordering::Relaxed))
            .finish()
    }
}

/// Temporary sibling used while materializing `dir`
pub(crate) fn temp_sibling(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoint".to_string());
    dir.with_file_name(format!("{name}.tmp"))
}
