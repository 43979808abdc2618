//! Base engine options

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_write_buffer_size() -> u64 {
    64 * 1024 * 1024
}

/// Options for opening an [`Engine`](crate::Engine)
///
/// Persisted as the `[engine]` table of the database config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Create the directory and an empty database when missing
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// Refuse to open a directory that already holds a database
    #[serde(default)]
    pub error_if_exists: bool,
    /// Flush automatically once the WAL reaches this many bytes (0 = never)
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            write_buffer_size: default_write_buffer_size(),
        }
    }
}
