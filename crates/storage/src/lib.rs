//! Storage layer for Strata
//!
//! This crate implements the base ordered key/value engine:
//! - Engine: directory-backed store implementing `strata_core::Storage`
//! - Per-column-family version chains (MVCC) so snapshots are a sequence number
//! - WAL-first writes, flush to immutable table files, MANIFEST-driven recovery
//! - Checkpoints built from hard links plus a copied WAL prefix

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod memtable;
pub mod merge;

pub use config::EngineOptions;
pub use engine::Engine;
pub use memtable::{ColumnFamilyTable, StoredVersion, VersionChain};
