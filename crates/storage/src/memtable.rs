//! Multi-version in-memory index for one column family
//!
//! Each key maps to a version chain stored newest-first, so a read at
//! sequence `s` skips versions newer than `s` and stops at the first Put
//! or Delete. Snapshots are therefore just a sequence number.

use std::collections::{BTreeMap, VecDeque};

use strata_core::{MergeOperator, OpKind, SequenceNumber, StrataResult};

use crate::merge::resolve;

/// One stored version of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    /// Sequence of the write
    pub seq: SequenceNumber,
    /// Put, Delete or Merge
    pub kind: OpKind,
    /// Value or merge operand (empty for deletes)
    pub value: Vec<u8>,
}

/// Versions of a single key, newest first
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: VecDeque<StoredVersion>,
}

impl VersionChain {
    /// Add a version
    ///
    /// Live writes always arrive in increasing sequence order. Recovery may
    /// replay table entries out of order, so older versions are inserted in
    /// place.
    pub fn push(&mut self, version: StoredVersion) {
        match self.versions.front() {
            Some(front) if front.seq > version.seq => {
                let idx = self.versions.partition_point(|v| v.seq > version.seq);
                self.versions.insert(idx, version);
            }
            _ => self.versions.push_front(version),
        }
    }

    /// Versions visible at `read_seq`, newest first
    pub fn visible_at(&self, read_seq: SequenceNumber) -> impl Iterator<Item = &StoredVersion> {
        self.versions.iter().skip_while(move |v| v.seq > read_seq)
    }

    /// Sequence of the newest version
    pub fn latest_seq(&self) -> Option<SequenceNumber> {
        self.versions.front().map(|v| v.seq)
    }

    /// Fold every version visible at `horizon` into a single one
    ///
    /// The folded version is a Put of the resolved value, or a Delete when
    /// the key reads as absent, stamped with the newest visible sequence.
    /// Versions newer than `horizon` are untouched, so reads at or above
    /// `horizon` and `latest_seq` are unchanged. Returns the number of
    /// versions dropped.
    pub fn collapse_at(
        &mut self,
        key: &[u8],
        horizon: SequenceNumber,
        operator: &dyn MergeOperator,
    ) -> StrataResult<usize> {
        let split = self.versions.partition_point(|v| v.seq > horizon);
        let visible = self.versions.len() - split;
        if visible <= 1 {
            return Ok(0);
        }
        let seq = self.versions[split].seq;
        let folded = match resolve(key, self.versions.range(split..), operator)? {
            Some(value) => StoredVersion {
                seq,
                kind: OpKind::Put,
                value,
            },
            None => StoredVersion {
                seq,
                kind: OpKind::Delete,
                value: Vec::new(),
            },
        };
        self.versions.truncate(split);
        self.versions.push_back(folded);
        Ok(visible - 1)
    }

    /// Number of versions held
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// True when the chain holds no versions
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Ordered version chains for one column family
#[derive(Debug, Clone, Default)]
pub struct ColumnFamilyTable {
    chains: BTreeMap<Vec<u8>, VersionChain>,
}

impl ColumnFamilyTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a version of `key`
    pub fn insert(&mut self, key: &[u8], seq: SequenceNumber, kind: OpKind, value: &[u8]) {
        let version = StoredVersion {
            seq,
            kind,
            value: if kind == OpKind::Delete {
                Vec::new()
            } else {
                value.to_vec()
            },
        };
        match self.chains.get_mut(key) {
            Some(chain) => chain.push(version),
            None => {
                let mut chain = VersionChain::default();
                chain.push(version);
                self.chains.insert(key.to_vec(), chain);
            }
        }
    }

    /// Visible value of `key` at `read_seq`
    pub fn get(
        &self,
        key: &[u8],
        read_seq: SequenceNumber,
        operator: &dyn MergeOperator,
    ) -> StrataResult<Option<Vec<u8>>> {
        match self.chains.get(key) {
            Some(chain) => resolve(key, chain.visible_at(read_seq), operator),
            None => Ok(None),
        }
    }

    /// Sequence of the newest write to `key`, deletes included
    pub fn latest_sequence(&self, key: &[u8]) -> Option<SequenceNumber> {
        self.chains.get(key).and_then(VersionChain::latest_seq)
    }

    /// Every live `(key, value)` at `read_seq`, in key order
    pub fn scan(
        &self,
        read_seq: SequenceNumber,
        operator: &dyn MergeOperator,
    ) -> StrataResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for (key, chain) in &self.chains {
            if let Some(value) = resolve(key, chain.visible_at(read_seq), operator)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }

    /// Versions with `seq > after`, by key then newest first
    pub fn versions_after(
        &self,
        after: SequenceNumber,
    ) -> impl Iterator<Item = (&[u8], &StoredVersion)> {
        self.chains.iter().flat_map(move |(key, chain)| {
            chain
                .versions
                .iter()
                .take_while(move |v| v.seq > after)
                .map(move |v| (key.as_slice(), v))
        })
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.chains.len()
    }

    /// Number of versions of `key` held in memory
    pub fn version_count(&self, key: &[u8]) -> usize {
        self.chains.get(key).map(VersionChain::len).unwrap_or(0)
    }

    /// Collapse history no reader at or above `horizon` can observe
    ///
    /// Tombstones survive so `latest_sequence` keeps reporting deletes.
    /// Returns the number of versions dropped.
    pub fn prune(&mut self, horizon: SequenceNumber, operator: &dyn MergeOperator) -> StrataResult<usize> {
        let mut dropped = 0;
        for (key, chain) in self.chains.iter_mut() {
            dropped += chain.collapse_at(key, horizon, operator)?;
        }
        Ok(dropped)
    }
}
