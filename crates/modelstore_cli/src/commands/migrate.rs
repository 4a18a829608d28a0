//! Migrate command implementation.
//!
//! Copies every entity of an existing store into a fresh log file,
//! possibly with another encoding.

use super::{format_size, open_log};
use modelstore_core::{BackendConfig, CopyReport, DataMapper, EncodingKind, KvBackend};
use modelstore_storage::{KeyValueStore, LogStore, LogStoreOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the migrate command.
pub fn run(
    source: &Path,
    target: &Path,
    encoding: EncodingKind,
    instance_index: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = migrate(source, target, encoding, instance_index)?;

    println!("Migrated {} to {}", source.display(), target.display());
    println!("  Encoding:  {encoding}");
    println!("  Entities:  {}", report.entities);
    println!("  Features:  {}", report.features);
    println!("  Elements:  {}", report.elements);
    println!(
        "  Copy mode: {}",
        if report.fast_path { "raw records" } else { "per feature" }
    );
    if let Ok(meta) = std::fs::metadata(target) {
        println!("  Size:      {}", format_size(meta.len()));
    }

    Ok(())
}

/// Copies the store at `source` into a new store at `target`.
pub fn migrate(
    source: &Path,
    target: &Path,
    encoding: EncodingKind,
    instance_index: bool,
) -> Result<CopyReport, Box<dyn std::error::Error>> {
    if target.exists() {
        return Err(format!("Target {} already exists", target.display()).into());
    }
    info!(source = %source.display(), target = %target.display(), %encoding, "starting migration");

    let input: Arc<dyn KeyValueStore> = Arc::new(open_log(source)?);
    let from = KvBackend::open_existing(input, BackendConfig::new())?;

    let output: Arc<dyn KeyValueStore> = Arc::new(LogStore::open(target, LogStoreOptions::new())?);
    let config = BackendConfig::new()
        .encoding(encoding)
        .instance_index(instance_index);
    let to = KvBackend::open(output, config)?;

    let report = from.copy_to(&to)?;
    to.close()?;
    from.close()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::{ClassDescriptor, Id, SingleFeatureKey, Slot, Value};
    use tempfile::tempdir;

    fn seed(path: &Path, owner: Id) {
        let log = LogStore::open(path, LogStoreOptions::default()).unwrap();
        let backend = KvBackend::open(Arc::new(log), BackendConfig::new()).unwrap();
        backend
            .class_for(&owner, &ClassDescriptor::new("urn:shapes", "Shape"))
            .unwrap();
        backend
            .append_all(
                &SingleFeatureKey::new(owner, "tags"),
                vec![Slot::Value(Value::from("a")), Slot::Value(Value::from("b"))],
            )
            .unwrap();
        backend.close().unwrap();
    }

    #[test]
    fn changes_encoding() {
        let dir = tempdir().unwrap();
        let (source, target) = (dir.path().join("a.log"), dir.path().join("b.log"));
        let owner = Id::generate();
        seed(&source, owner);

        let report = migrate(&source, &target, EncodingKind::Array, true).unwrap();
        assert_eq!(report.entities, 1);
        assert!(!report.fast_path);

        let log = LogStore::open(&target, LogStoreOptions::default()).unwrap();
        let backend = KvBackend::open_existing(Arc::new(log), BackendConfig::new()).unwrap();
        assert_eq!(backend.metadata().encoding, EncodingKind::Array);
        assert_eq!(backend.size_of(&SingleFeatureKey::new(owner, "tags")).unwrap(), 2);
    }

    #[test]
    fn refuses_existing_target() {
        let dir = tempdir().unwrap();
        let (source, target) = (dir.path().join("a.log"), dir.path().join("b.log"));
        seed(&source, Id::generate());
        std::fs::write(&target, b"").unwrap();

        assert!(migrate(&source, &target, EncodingKind::List, true).is_err());
    }
}
