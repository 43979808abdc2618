//! Transaction Integration Tests
//!
//! End-to-end behavior through the public `strata_txndb` surface, across
//! both database flavors and across reopen.

#[path = "../common/mod.rs"]
mod common;

mod read_your_writes;
mod recovery;
mod shared_engine;
