//! Filesystem locations
//!
//! Everything lives under `~/.advisor`, falling back to the working directory
//! when no home directory is known.

use std::path::PathBuf;

use crate::constants::storage;

/// Root configuration directory (`~/.advisor`)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(storage::CONFIG_DIR_NAME)
}

/// Default configuration file
pub fn config_file() -> PathBuf {
    config_dir().join(storage::CONFIG_FILE_NAME)
}

/// Directory for log files
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Default history database
pub fn history_db() -> PathBuf {
    config_dir().join(storage::HISTORY_DB_NAME)
}
