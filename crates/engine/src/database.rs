//! Behavior shared by both database flavors
//!
//! A database handle owns one base `Engine` and the config it was opened
//! with. Reads, snapshots, column families and flushes work the same for
//! pessimistic and optimistic databases; only writes and transactions
//! differ.

use std::path::Path;
use std::sync::Arc;

use strata_concurrency::{ReadOptions, Snapshot};
use strata_core::{ColumnFamilyId, Storage, StrataResult};
use strata_storage::Engine;
use tracing::info;

use crate::config::{DbConfig, CONFIG_FILE_NAME};

/// Open the base engine at `path` and persist `config` next to it
pub(crate) fn open_engine(path: &Path, config: &DbConfig) -> StrataResult<Arc<Engine>> {
    config.validate()?;
    let engine = Engine::open(path, config.engine.clone())?;
    config.write_to_file(&path.join(CONFIG_FILE_NAME))?;
    info!(
        target: "strata::db",
        path = %path.display(),
        sequence = engine.current_sequence(),
        "Opened database"
    );
    Ok(Arc::new(engine))
}

/// Operations common to every database handle
pub trait DatabaseHandle {
    /// Base engine
    fn engine(&self) -> &Arc<Engine>;

    /// Config the database was opened with
    fn config(&self) -> &DbConfig;

    /// Base engine as the `Storage` contract
    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(self.engine()) as Arc<dyn Storage>
    }

    /// Data directory
    fn path(&self) -> &Path {
        self.engine().path()
    }

    /// Pin the current state for consistent reads
    ///
    /// O(1); never blocks writers. Released when the last handle drops.
    fn snapshot(&self) -> Arc<Snapshot> {
        Snapshot::acquire(self.storage())
    }

    /// Read committed state outside any transaction
    fn get_cf(
        &self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StrataResult<Option<Vec<u8>>> {
        self.engine().get(cf, key, read_options.read_sequence())
    }

    /// `get_cf` on the default column family
    fn get(&self, read_options: &ReadOptions, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        self.get_cf(read_options, ColumnFamilyId::DEFAULT, key)
    }

    /// Committed entries of `cf` in key order
    fn scan_cf(
        &self,
        read_options: &ReadOptions,
        cf: ColumnFamilyId,
    ) -> StrataResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.engine().scan(cf, read_options.read_sequence())
    }

    /// Create a column family
    fn create_column_family(&self, name: &str) -> StrataResult<ColumnFamilyId> {
        self.engine().create_column_family(name)
    }

    /// Look a column family up by name
    fn column_family(&self, name: &str) -> Option<ColumnFamilyId> {
        self.engine().column_family(name)
    }

    /// Flush every column family to table files
    fn flush(&self) -> StrataResult<()> {
        self.engine().flush()
    }
}
