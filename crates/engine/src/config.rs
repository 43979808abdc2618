//! Database configuration via `strata.toml`
//!
//! `TransactionDb::open` and `OptimisticTransactionDb::open` write the
//! config they were given to `strata.toml` in the data directory, so a
//! later `open_default` picks the same settings up again.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_concurrency::TransactionDbOptions;
use strata_core::{StrataError, StrataResult};
use strata_storage::EngineOptions;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Database configuration loaded from `strata.toml`.
///
/// # Example
///
/// ```toml
/// [engine]
/// write_buffer_size = 67108864
///
/// [transaction_db]
/// num_stripes = 16
/// transaction_lock_timeout = 1000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Base engine options
    #[serde(default)]
    pub engine: EngineOptions,
    /// Lock table and timeout options (ignored by optimistic databases)
    #[serde(default)]
    pub transaction_db: TransactionDbOptions,
}

impl DbConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata database configuration

[engine]
# Create the database when the directory is empty (default: true)
create_if_missing = true
# Refuse to open an existing database (default: false)
error_if_exists = false
# Flush once the WAL holds this many bytes; 0 disables automatic flush
write_buffer_size = 67108864

[transaction_db]
# Locks held per column family; -1 = unlimited
max_num_locks = -1
# Lock table stripes
num_stripes = 16
# Lock timeout in ms for transactions without their own (-1 = wait forever)
transaction_lock_timeout = 1000
# Lock timeout in ms for writes issued outside a transaction
default_lock_timeout = 1000
"#
    }

    /// Check option ranges
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `num_stripes` is zero.
    pub fn validate(&self) -> StrataResult<()> {
        if self.transaction_db.num_stripes == 0 {
            return Err(StrataError::invalid_input(
                "num_stripes must be at least 1",
            ));
        }
        Ok(())
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::storage(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: DbConfig = toml::from_str(&content).map_err(|e| {
            StrataError::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read `strata.toml` from `data_dir`, or the defaults when it is absent.
    pub fn from_dir_or_default(data_dir: &Path) -> StrataResult<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> StrataResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StrataError::storage(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            StrataError::storage(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
