//! # ModelStore Storage
//!
//! Physical substrates for ModelStore.
//!
//! This crate provides the lowest-level storage abstractions. Substrates
//! are **opaque stores** - they do not interpret the keys, values or
//! properties they hold; the feature-mapping layer in `modelstore_core`
//! owns every layout.
//!
//! ## Design Principles
//!
//! - Key-value stores are ordered byte maps with atomic batches
//! - No knowledge of entities, features or encodings
//! - Must be `Send + Sync`; all access takes `&self`
//! - Close is idempotent and releases resources exactly once
//!
//! ## Available Substrates
//!
//! - [`MemoryStore`] - volatile ordered map
//! - [`LogStore`] - persistent log-structured file with CRC-framed batches
//! - [`PropertyGraph`] - in-memory vertices and labeled edges
//!
//! ## Example
//!
//! ```rust
//! use modelstore_storage::{KeyValueStore, MemoryStore, WriteBatch};
//!
//! let store = MemoryStore::new();
//! let mut batch = WriteBatch::new();
//! batch.put(b"a".to_vec(), b"1".to_vec()).put(b"b".to_vec(), b"2".to_vec());
//! store.write_batch(batch).unwrap();
//! assert_eq!(store.len().unwrap(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod graph;
mod kv;
mod log;
mod memory;

pub use error::{StorageError, StorageResult};
pub use graph::{Edge, EdgeId, GraphData, PropertyGraph};
pub use kv::{BatchOp, KeyValueStore, WriteBatch};
pub use log::{compute_crc32, LogStore, LogStoreOptions, SyncPolicy, DEFAULT_OPS_BETWEEN_SYNCS};
pub use memory::MemoryStore;
