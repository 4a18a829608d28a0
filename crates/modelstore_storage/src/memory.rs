//! In-memory key-value store.

use crate::error::{StorageError, StorageResult};
use crate::kv::{BatchOp, KeyValueStore, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory ordered key-value store.
///
/// This store keeps all records in a `BTreeMap` and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Transient models that don't need persistence
///
/// # Thread Safety
///
/// Batches are applied under a single write lock, so concurrent readers
/// never observe half of a batch.
///
/// # Example
///
/// ```rust
/// use modelstore_storage::{KeyValueStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.put(b"key", b"value").unwrap();
/// assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    ///
    /// Useful for testing recovery and copy scenarios.
    #[must_use]
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        Self {
            data: RwLock::new(entries.into_iter().collect()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Applies batch operations to an ordered map.
pub(crate) fn apply_ops(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                map.insert(key, value);
            }
            BatchOp::Delete { key } => {
                map.remove(&key);
            }
        }
    }
}

/// Collects the entries of `map` whose key starts with `prefix`.
pub(crate) fn collect_prefix(
    map: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.data.write().insert(key.to_vec(), value.to_vec()))
    }

    fn delete(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.data.write().remove(key))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        Ok(collect_prefix(&self.data.read(), prefix))
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.ensure_open()?;
        apply_ops(&mut self.data.write(), batch.into_ops());
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.data.read().len())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        self.ensure_open()
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty().unwrap());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn memory_put_returns_previous() {
        let store = MemoryStore::new();
        assert_eq!(store.put(b"k", b"1").unwrap(), None);
        assert_eq!(store.put(b"k", b"2").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn memory_delete() {
        let store = MemoryStore::new();
        store.put(b"k", b"1").unwrap();
        assert_eq!(store.delete(b"k").unwrap(), Some(b"1".to_vec()));
        assert!(!store.contains(b"k").unwrap());
        assert_eq!(store.delete(b"k").unwrap(), None);
    }

    #[test]
    fn memory_scan_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put(b"a/2", b"x").unwrap();
        store.put(b"a/1", b"y").unwrap();
        store.put(b"b/1", b"z").unwrap();
        store.put(b"a", b"w").unwrap();

        let keys: Vec<_> = store
            .scan_prefix(b"a/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
    }

    #[test]
    fn memory_batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put(b"a".to_vec(), b"1".to_vec())
            .put(b"a".to_vec(), b"2".to_vec())
            .put(b"b".to_vec(), b"3".to_vec())
            .delete(b"b".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn memory_with_entries() {
        let store = MemoryStore::with_entries(vec![(b"k".to_vec(), b"v".to_vec())]);
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn memory_close_is_idempotent() {
        let store = MemoryStore::new();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get(b"k"), Err(StorageError::Closed)));
    }
}
