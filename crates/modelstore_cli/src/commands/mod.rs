//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod migrate;

use modelstore_storage::{LogStore, LogStoreOptions};
use std::path::Path;

/// Opens an existing log file; never creates one.
pub fn open_log(path: &Path) -> Result<LogStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(LogStore::open(
        path,
        LogStoreOptions::new().create_if_missing(false),
    )?)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
