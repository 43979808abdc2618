//! Point-in-time read views
//!
//! A `Snapshot` pins a sequence number in the base engine. Reads through it
//! see exactly the writes with sequence `<=` the pinned one. Creating one is
//! O(1) and never blocks writers.
//!
//! Snapshots are shared through `Arc`; the pin is released when the last
//! handle drops, exactly once.

use std::sync::Arc;

use strata_core::{SequenceNumber, Storage};
use tracing::trace;

/// Immutable reference to a committed sequence point
pub struct Snapshot {
    sequence: SequenceNumber,
    storage: Arc<dyn Storage>,
}

impl Snapshot {
    /// Pin the current sequence of `storage`
    pub fn acquire(storage: Arc<dyn Storage>) -> Arc<Snapshot> {
        let sequence = storage.acquire_snapshot();
        trace!(target: "strata::txn", sequence, "Acquired snapshot");
        Arc::new(Snapshot { sequence, storage })
    }

    /// The pinned sequence
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.storage.release_snapshot(self.sequence);
        trace!(target: "strata::txn", sequence = self.sequence, "Released snapshot");
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Options of a single read
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Read as of this snapshot; `None` reads the latest committed state
    pub snapshot: Option<Arc<Snapshot>>,
}

impl ReadOptions {
    /// Read the latest committed state
    pub fn new() -> Self {
        Self::default()
    }

    /// Read as of `snapshot`
    pub fn at(snapshot: &Arc<Snapshot>) -> Self {
        ReadOptions {
            snapshot: Some(Arc::clone(snapshot)),
        }
    }

    /// Sequence bound for base-engine reads
    pub fn read_sequence(&self) -> Option<SequenceNumber> {
        self.snapshot.as_ref().map(|s| s.sequence())
    }
}
