//! Checkpoint capability
//!
//! `Checkpoint::new(&db)?.create(dir, log_size_for_flush)` materializes an
//! independent, openable copy of a live database. See
//! [`Engine::checkpoint_to`] for the on-disk procedure.

use std::path::Path;
use std::sync::Arc;

use strata_core::StrataResult;
use strata_storage::Engine;
use tracing::debug;

use crate::database::DatabaseHandle;

/// Handle for taking checkpoints of one database
pub struct Checkpoint {
    engine: Arc<Engine>,
}

impl Checkpoint {
    /// Bind a checkpoint handle to `db`
    pub fn new<D: DatabaseHandle + ?Sized>(db: &D) -> StrataResult<Self> {
        Ok(Checkpoint {
            engine: Arc::clone(db.engine()),
        })
    }

    /// Write a checkpoint to `dir`, which must not exist
    ///
    /// Flushes first when the live WAL holds at least `log_size_for_flush`
    /// bytes; zero always flushes.
    ///
    /// # Errors
    ///
    /// - `CheckpointTargetExists` if `dir` exists
    /// - `CheckpointIo` if any file operation fails; nothing is left at `dir`
    pub fn create(&self, dir: impl AsRef<Path>, log_size_for_flush: u64) -> StrataResult<()> {
        let dir = dir.as_ref();
        debug!(target: "strata::checkpoint", path = %dir.display(), log_size_for_flush, "Creating checkpoint");
        self.engine.checkpoint_to(dir, log_size_for_flush)
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("source", &self.engine.path())
            .finish()
    }
}
