//! # ModelStore Core
//!
//! Feature-mapping engine for ModelStore.
//!
//! This crate translates structural mutations on the named features of
//! entities (get, set, add, remove, move) into reads and writes on a
//! physical substrate from `modelstore_storage`.
//!
//! - [`DataMapper`] - the backend contract every mapper implements
//! - [`KvBackend`] - any ordered key-value store, with a choice of
//!   [`EncodingKind`] for many-valued features
//! - [`GraphBackend`] - vertices, properties and labeled edges
//! - [`FeatureCachingMapper`] - a decorator memoizing reads and
//!   invalidating shifted positions
//! - [`ModelStore`] - typed façade with containment tracking and
//!   metamodel-driven dispatch
//!
//! ## Example
//!
//! ```rust
//! use modelstore_core::{BackendConfig, DataMapper, EncodingKind, Id, KvBackend, SingleFeatureKey, Slot};
//!
//! let backend = KvBackend::in_memory(BackendConfig::new().encoding(EncodingKind::List)).unwrap();
//! let key = SingleFeatureKey::new(Id::generate(), "items");
//!
//! backend.insert_at(&key.with_position(0), Slot::Value("a".into())).unwrap();
//! backend.insert_at(&key.with_position(0), Slot::Value("b".into())).unwrap();
//! assert_eq!(backend.size_of(&key).unwrap(), 2);
//! assert_eq!(backend.get_at(&key.with_position(1)).unwrap(), Slot::Value("a".into()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod class;
mod config;
mod containment;
mod copy;
mod encoding;
mod error;
mod feature;
mod graph_backend;
mod id;
mod keys;
mod kv_backend;
mod locks;
mod mapper;
mod meta;
mod stats;
mod store;

pub use cache::{BoundedCache, FeatureCachingMapper};
pub use class::ClassDescriptor;
pub use config::{BackendConfig, CacheConfig, EncodingKind, StoreConfig};
pub use containment::ContainmentTracker;
pub use copy::{copy_all, CopyReport};
pub use error::{CoreError, CoreResult};
pub use feature::{
    ContainerEdge, ManyFeatureKey, SingleFeatureKey, Slot, StoredFeature, StoredShape,
};
pub use graph_backend::GraphBackend;
pub use id::Id;
pub use keys::record_kind;
pub use kv_backend::{record_histogram, KvBackend, StoreMetadata, FORMAT_VERSION};
pub use mapper::DataMapper;
pub use meta::{
    ClassInfo, FeatureDescriptor, FeatureKind, MetaModel, MetaModelRegistry, Multiplicity,
};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{Entity, ModelStore};

/// Re-exported so callers can build attribute slots without a direct
/// dependency on the codec crate.
pub use modelstore_codec::Value;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
