//! Inspect command implementation.

use super::{format_size, open_log};
use modelstore_core::{record_histogram, BackendConfig, DataMapper, KvBackend};
use modelstore_storage::KeyValueStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Log file size in bytes.
    pub file_size: u64,
    /// Persisted format version.
    pub format_version: u16,
    /// Encoding of many-valued features.
    pub encoding: String,
    /// Whether the class to instances index is maintained.
    pub instance_index: bool,
    /// Live records per record kind.
    pub records: BTreeMap<String, u64>,
    /// Number of entities with stored data.
    pub entity_count: usize,
    /// Entities per class (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<BTreeMap<String, u64>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_classes: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path, show_classes)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the statistics of the store at `path`.
pub fn collect(path: &Path, show_classes: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let log = Arc::new(open_log(path)?);
    let file_size = log.file_len();

    let metadata = KvBackend::read_metadata(log.as_ref())?
        .ok_or_else(|| format!("{} is not a ModelStore log", path.display()))?;
    let records = record_histogram(log.as_ref())?
        .into_iter()
        .map(|(kind, count)| (kind.to_string(), count))
        .collect();

    let store: Arc<dyn KeyValueStore> = log;
    let backend = KvBackend::open_existing(store, BackendConfig::new())?;
    let entities = backend.entities()?;

    let classes = if show_classes {
        let mut histogram = BTreeMap::new();
        for id in &entities {
            let name = match backend.class_of(id)? {
                Some(class) => class.to_string(),
                None => "(unbound)".to_string(),
            };
            *histogram.entry(name).or_insert(0) += 1;
        }
        Some(histogram)
    } else {
        None
    };
    backend.close()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size,
        format_version: metadata.format_version,
        encoding: metadata.encoding.to_string(),
        instance_index: metadata.instance_index,
        records,
        entity_count: entities.len(),
        classes,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("ModelStore Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    println!();
    println!("Layout:");
    println!("  Format version: {}", result.format_version);
    println!("  Encoding:       {}", result.encoding);
    println!(
        "  Instance index: {}",
        if result.instance_index { "on" } else { "off" }
    );
    println!();
    println!("Records:");
    for (kind, count) in &result.records {
        println!("  {kind:<16} {count}");
    }
    println!();
    println!("Entities: {}", result.entity_count);

    if let Some(classes) = &result.classes {
        println!();
        println!("Classes:");
        for (class, count) in classes {
            println!("  {class}: {count}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::{ClassDescriptor, EncodingKind, Id, SingleFeatureKey, Slot, Value};
    use modelstore_storage::{LogStore, LogStoreOptions};
    use tempfile::tempdir;

    #[test]
    fn reports_layout_and_classes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.log");
        {
            let log = LogStore::open(&path, LogStoreOptions::default()).unwrap();
            let backend = KvBackend::open(
                Arc::new(log),
                BackendConfig::new().encoding(EncodingKind::List),
            )
            .unwrap();
            let shape = ClassDescriptor::new("urn:shapes", "Shape");
            for _ in 0..3 {
                let id = Id::generate();
                backend.class_for(&id, &shape).unwrap();
                backend
                    .append(&SingleFeatureKey::new(id, "tags"), Slot::Value(Value::from("t")))
                    .unwrap();
            }
            backend.close().unwrap();
        }

        let result = collect(&path, true).unwrap();
        assert_eq!(result.encoding, "list");
        assert!(result.instance_index);
        assert_eq!(result.entity_count, 3);
        assert_eq!(result.classes.unwrap().get("urn:shapes#Shape"), Some(&3));
        assert!(result.file_size > 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(collect(&dir.path().join("absent.log"), false).is_err());
    }
}
