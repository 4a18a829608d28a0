//! Compact command implementation.

use super::{format_size, open_log};
use modelstore_storage::KeyValueStore;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Live records.
    pub live_records: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction (equal to `bytes_before` on a dry run).
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;

    println!("  Live records: {}", stats.live_records);
    println!("  Size before:  {}", format_size(stats.bytes_before));
    if !dry_run {
        let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
        println!("  Size after:   {}", format_size(stats.bytes_after));
        println!(
            "  Space saved:  {} ({:.1}%)",
            format_size(saved),
            if stats.bytes_before > 0 {
                saved as f64 / stats.bytes_before as f64 * 100.0
            } else {
                0.0
            }
        );
    }

    Ok(())
}

/// Compacts the log at `path` unless `dry_run` is set.
pub fn compact(path: &Path, dry_run: bool) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let log = open_log(path)?;
    let bytes_before = log.file_len();
    let live_records = log.len()?;
    if !dry_run {
        log.compact()?;
    }
    let bytes_after = log.file_len();
    log.close()?;

    Ok(CompactStats {
        live_records,
        bytes_before,
        bytes_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_storage::{LogStore, LogStoreOptions};
    use tempfile::tempdir;

    #[test]
    fn shrinks_overwritten_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.log");
        {
            let log = LogStore::open(&path, LogStoreOptions::default()).unwrap();
            for i in 0..50u32 {
                log.put(b"key", &i.to_le_bytes()).unwrap();
            }
            log.close().unwrap();
        }

        let dry = compact(&path, true).unwrap();
        assert_eq!(dry.bytes_after, dry.bytes_before);

        let stats = compact(&path, false).unwrap();
        assert_eq!(stats.live_records, 1);
        assert!(stats.bytes_after < stats.bytes_before);
    }
}
