//! Database handles for Strata
//!
//! This crate ties the lower layers together:
//! - TransactionDb: pessimistic transactions over a shared lock table
//! - OptimisticTransactionDb: transactions validated at commit
//! - Checkpoint: openable on-disk copies of a live database
//! - DbConfig: `strata.toml` configuration
//!
//! Dropping a database closes it: the WAL is synced and the directory
//! lock released.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod database;
pub mod optimistic_db;
pub mod transaction_db;

pub use checkpoint::Checkpoint;
pub use config::{DbConfig, CONFIG_FILE_NAME};
pub use database::DatabaseHandle;
pub use optimistic_db::OptimisticTransactionDb;
pub use transaction_db::TransactionDb;
