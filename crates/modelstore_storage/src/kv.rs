//! Key-value store trait definition.

use crate::error::StorageResult;

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put {
        /// Record key.
        key: Vec<u8>,
        /// Record value.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Delete {
        /// Record key.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An ordered group of writes applied all-or-nothing.
///
/// Operations are applied in insertion order, so a later `put` on the
/// same key wins over an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty batch with room for `capacity` operations.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    /// Appends every operation of `other`.
    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    /// Returns the queued operations.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch, returning its operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// An ordered byte-keyed store.
///
/// Key-value stores are **opaque byte stores**: the feature-mapping layer
/// owns every key and value layout. Stores use interior mutability so a
/// single instance can be shared by a backend and its decorators.
///
/// # Invariants
///
/// - `get` after `put` on the same key returns the written bytes
/// - `scan_prefix` yields entries in ascending key order
/// - `write_batch` is atomic: readers observe all of its operations or none
/// - `close` is idempotent; every other call after `close` fails with
///   [`crate::StorageError::Closed`]
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - volatile, for tests and scratch models
/// - [`crate::LogStore`] - persistent, log-structured file
pub trait KeyValueStore: Send + Sync {
    /// Returns a short name for diagnostics.
    fn name(&self) -> &str;

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the write fails.
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Removes `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the write fails.
    fn delete(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns `true` if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns every entry whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the write fails; in that
    /// case none of the batch is visible.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Returns the number of live keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn len(&self) -> StorageResult<usize>;

    /// Returns `true` if the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Makes every acknowledged write durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn flush(&self) -> StorageResult<()>;

    /// Flushes and releases the underlying resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails. The store is marked
    /// closed regardless.
    fn close(&self) -> StorageResult<()>;

    /// Returns `true` once [`KeyValueStore::close`] has run.
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_insertion_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec()).delete(b"b".to_vec());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[0].key(), b"a");
        assert_eq!(batch.ops()[1], BatchOp::Delete { key: b"b".to_vec() });
    }

    #[test]
    fn batch_extend() {
        let mut first = WriteBatch::new();
        first.put(b"a".to_vec(), b"1".to_vec());
        let mut second = WriteBatch::with_capacity(1);
        second.delete(b"a".to_vec());
        first.extend(second);
        assert_eq!(first.into_ops().len(), 2);
    }
}
