//! Feature mapping over an ordered key-value store.

use crate::class::ClassDescriptor;
use crate::config::{BackendConfig, EncodingKind};
use crate::copy::{copy_all, CopyReport};
use crate::encoding::{self, decode_slot, encode_slot, ManyEncoding};
use crate::error::{CoreError, CoreResult};
use crate::feature::{
    ContainerEdge, ManyFeatureKey, SingleFeatureKey, Slot, StoredFeature, StoredShape,
};
use crate::id::Id;
use crate::keys;
use crate::locks::FeatureLocks;
use crate::mapper::DataMapper;
use modelstore_codec::{from_cbor, to_cbor};
use modelstore_storage::{KeyValueStore, MemoryStore, WriteBatch};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current on-disk layout version.
pub const FORMAT_VERSION: u16 = 1;

/// Operations per batch when copying raw records.
const RAW_COPY_CHUNK: usize = 10_000;

/// Layout description persisted in every key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Layout version.
    pub format_version: u16,
    /// Encoding of many-valued features.
    pub encoding: EncodingKind,
    /// Whether the class-to-instances index is maintained.
    pub instance_index: bool,
}

impl StoreMetadata {
    fn from_config(config: &BackendConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            encoding: config.encoding,
            instance_index: config.instance_index,
        }
    }
}

/// A [`DataMapper`] storing entities in any [`KeyValueStore`].
///
/// # Record layout
///
/// Single-valued features, class bindings, container edges and the
/// optional instance index each live in their own record family; the
/// configured [`EncodingKind`] lays out many-valued features. See the
/// `keys` module for the tags.
///
/// # Atomicity
///
/// Every mutation is issued as one [`WriteBatch`]. Both bundled stores
/// apply batches all-or-nothing, so a failed write leaves the previous
/// state of every touched key intact. On a `LogStore`, durability of
/// acknowledged batches follows its `SyncPolicy`.
///
/// # Concurrency
///
/// Shifts on one `(owner, feature)` run under a striped lock; a move
/// between two features locks both stripes in a fixed order.
///
/// # Example
///
/// ```rust
/// use modelstore_core::{BackendConfig, DataMapper, Id, KvBackend, SingleFeatureKey};
/// use modelstore_codec::Value;
///
/// let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
/// let key = SingleFeatureKey::new(Id::generate(), "tags");
/// backend.append_value(&key, Value::from("a")).unwrap();
/// backend.append_value(&key, Value::from("b")).unwrap();
/// assert_eq!(backend.size_of(&key).unwrap(), 2);
/// ```
pub struct KvBackend {
    store: Arc<dyn KeyValueStore>,
    config: BackendConfig,
    encoding: Box<dyn ManyEncoding>,
    locks: FeatureLocks,
    class_lock: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for KvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvBackend")
            .field("store", &self.store.name())
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl KvBackend {
    /// Opens a backend on `store`.
    ///
    /// A new store is stamped with the configured layout. An existing
    /// store must have been created with the same encoding and index
    /// setting.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the persisted layout
    /// differs from `config`, or if a non-empty store has no metadata.
    pub fn open(store: Arc<dyn KeyValueStore>, config: BackendConfig) -> CoreResult<Self> {
        let wanted = StoreMetadata::from_config(&config);
        match Self::read_metadata(store.as_ref())? {
            Some(found) => {
                if found.format_version > FORMAT_VERSION {
                    return Err(CoreError::invalid_format(format!(
                        "store format version {} is newer than supported {FORMAT_VERSION}",
                        found.format_version
                    )));
                }
                if found.encoding != wanted.encoding {
                    return Err(CoreError::invalid_format(format!(
                        "store uses {} encoding, {} requested",
                        found.encoding, wanted.encoding
                    )));
                }
                if found.instance_index != wanted.instance_index {
                    return Err(CoreError::invalid_format(format!(
                        "store instance index is {}, {} requested",
                        on_off(found.instance_index),
                        on_off(wanted.instance_index)
                    )));
                }
            }
            None => {
                if !store.is_empty()? {
                    return Err(CoreError::invalid_format(
                        "store holds records but no metadata",
                    ));
                }
                store.put(&keys::meta(), &to_cbor(&wanted)?)?;
            }
        }

        info!(
            store = store.name(),
            encoding = %config.encoding,
            instance_index = config.instance_index,
            "opened key-value backend"
        );
        Ok(Self {
            encoding: encoding::strategy(config.encoding),
            locks: FeatureLocks::new(config.lock_stripes),
            store,
            config,
            class_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Opens a store created earlier, adopting its persisted layout.
    ///
    /// Settings other than the layout are taken from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the store has no metadata.
    pub fn open_existing(store: Arc<dyn KeyValueStore>, config: BackendConfig) -> CoreResult<Self> {
        let found = Self::read_metadata(store.as_ref())?
            .ok_or_else(|| CoreError::invalid_format("store has no metadata"))?;
        let config = config
            .encoding(found.encoding)
            .instance_index(found.instance_index);
        Self::open(store, config)
    }

    /// Opens a backend on a fresh [`MemoryStore`].
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata record cannot be written.
    pub fn in_memory(config: BackendConfig) -> CoreResult<Self> {
        Self::open(Arc::new(MemoryStore::new()), config)
    }

    /// Reads the layout stamped into `store`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata record is unreadable.
    pub fn read_metadata(store: &dyn KeyValueStore) -> CoreResult<Option<StoreMetadata>> {
        store
            .get(&keys::meta())?
            .map(|bytes| from_cbor(&bytes).map_err(CoreError::from))
            .transpose()
    }

    /// Returns the layout of this backend.
    #[must_use]
    pub fn metadata(&self) -> StoreMetadata {
        StoreMetadata::from_config(&self.config)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::BackendClosed)
        } else {
            Ok(())
        }
    }

    fn apply(&self, batch: WriteBatch) -> CoreResult<()> {
        if !batch.is_empty() {
            self.store.write_batch(batch)?;
        }
        Ok(())
    }

    fn single_key(key: &SingleFeatureKey) -> Vec<u8> {
        keys::feature(keys::SINGLE, &key.owner, &key.name)
    }

    fn decode_optional(bytes: Option<Vec<u8>>) -> CoreResult<Option<Slot>> {
        bytes.map(|b| decode_slot(&b)).transpose()
    }

    fn owners_with_tag(&self, tag: u8, into: &mut BTreeSet<Id>) -> CoreResult<()> {
        for (key, _) in self.store.scan_prefix(&keys::tag_prefix(tag))? {
            into.insert(keys::parse_owner(&key, tag)?);
        }
        Ok(())
    }

    /// Copies raw records into an empty backend with the same layout.
    fn copy_raw(&self, target: &KvBackend) -> CoreResult<CopyReport> {
        let meta = keys::meta();
        let mut batch = WriteBatch::with_capacity(RAW_COPY_CHUNK);
        let mut records = 0u64;
        for (key, value) in self.store.scan_prefix(&[])? {
            if key == meta {
                continue;
            }
            batch.put(key, value);
            records += 1;
            if batch.len() >= RAW_COPY_CHUNK {
                target.apply(std::mem::take(&mut batch))?;
            }
        }
        target.apply(batch)?;
        let entities = self.entities()?.len() as u64;
        info!(records, entities, "copied raw records");
        Ok(CopyReport {
            entities,
            features: 0,
            elements: records,
            fast_path: true,
        })
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

impl DataMapper for KvBackend {
    fn name(&self) -> &str {
        "kv"
    }

    fn get_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        self.ensure_open()?;
        Self::decode_optional(self.store.get(&Self::single_key(key))?)
    }

    fn set_single(&self, key: &SingleFeatureKey, slot: Slot) -> CoreResult<Option<Slot>> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        let previous = self.store.put(&Self::single_key(key), &encode_slot(&slot)?)?;
        Self::decode_optional(previous)
    }

    fn unset_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        Self::decode_optional(self.store.delete(&Self::single_key(key))?)
    }

    fn get_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        self.ensure_open()?;
        // Multi-record encodings must not observe a half-applied batch
        let _guard = self.locks.lock(&key.owner, &key.name);
        self.encoding
            .get(self.store.as_ref(), &key.without_position(), key.position)
    }

    fn set_at(&self, key: &ManyFeatureKey, slot: Slot) -> CoreResult<Slot> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        let (batch, previous) =
            self.encoding
                .set(self.store.as_ref(), &key.without_position(), key.position, slot)?;
        self.apply(batch)?;
        Ok(previous)
    }

    fn insert_all_at(&self, key: &ManyFeatureKey, slots: Vec<Slot>) -> CoreResult<()> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        let batch =
            self.encoding
                .insert(self.store.as_ref(), &key.without_position(), key.position, slots)?;
        self.apply(batch)
    }

    fn append_all(&self, key: &SingleFeatureKey, slots: Vec<Slot>) -> CoreResult<u32> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        let size = self.encoding.size(self.store.as_ref(), key)?;
        let batch = self.encoding.insert(self.store.as_ref(), key, size, slots)?;
        self.apply(batch)?;
        Ok(size)
    }

    fn remove_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        let (batch, removed) =
            self.encoding
                .remove(self.store.as_ref(), &key.without_position(), key.position)?;
        self.apply(batch)?;
        Ok(removed)
    }

    fn move_slot(&self, source: &ManyFeatureKey, target: &ManyFeatureKey) -> CoreResult<Slot> {
        self.ensure_open()?;
        let store = self.store.as_ref();
        if source.same_feature(target) {
            let _guard = self.locks.lock(&source.owner, &source.name);
            let (batch, moved) = self.encoding.move_within(
                store,
                &source.without_position(),
                source.position,
                target.position,
            )?;
            self.apply(batch)?;
            return Ok(moved);
        }

        let _guard = self.locks.lock_pair(
            (&source.owner, &source.name),
            (&target.owner, &target.name),
        );
        // Both batches are computed from the current state; they touch
        // disjoint features, so applying them together is exact
        let (mut batch, moved) =
            self.encoding
                .remove(store, &source.without_position(), source.position)?;
        let insert = self.encoding.insert(
            store,
            &target.without_position(),
            target.position,
            vec![moved.clone()],
        )?;
        batch.extend(insert);
        self.apply(batch)?;
        Ok(moved)
    }

    fn clear(&self, key: &SingleFeatureKey) -> CoreResult<()> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        let batch = self.encoding.clear(self.store.as_ref(), key)?;
        self.apply(batch)
    }

    fn size_of(&self, key: &SingleFeatureKey) -> CoreResult<u32> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        self.encoding.size(self.store.as_ref(), key)
    }

    fn all_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        self.ensure_open()?;
        let _guard = self.locks.lock(&key.owner, &key.name);
        self.encoding.all(self.store.as_ref(), key)
    }

    fn container_of(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.ensure_open()?;
        self.store
            .get(&keys::owner(keys::CONTAINER, id))?
            .map(|b| from_cbor(&b).map_err(CoreError::from))
            .transpose()
    }

    fn container_for(&self, id: &Id, edge: ContainerEdge) -> CoreResult<Option<ContainerEdge>> {
        self.ensure_open()?;
        self.store
            .put(&keys::owner(keys::CONTAINER, id), &to_cbor(&edge)?)?
            .map(|b| from_cbor(&b).map_err(CoreError::from))
            .transpose()
    }

    fn remove_container(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.ensure_open()?;
        self.store
            .delete(&keys::owner(keys::CONTAINER, id))?
            .map(|b| from_cbor(&b).map_err(CoreError::from))
            .transpose()
    }

    fn class_of(&self, id: &Id) -> CoreResult<Option<ClassDescriptor>> {
        self.ensure_open()?;
        self.store
            .get(&keys::owner(keys::CLASS, id))?
            .map(|b| from_cbor(&b).map_err(CoreError::from))
            .transpose()
    }

    fn class_for(&self, id: &Id, class: &ClassDescriptor) -> CoreResult<()> {
        self.ensure_open()?;
        let _guard = self.class_lock.lock();
        match self.class_of(id)? {
            Some(existing) if existing == *class => Ok(()),
            Some(existing) => {
                warn!(%id, %existing, requested = %class, "class binding conflict");
                Err(CoreError::ClassAlreadyExists {
                    id: id.to_string(),
                    existing: existing.to_string(),
                    requested: class.to_string(),
                })
            }
            None => {
                let mut batch = WriteBatch::with_capacity(2);
                batch.put(keys::owner(keys::CLASS, id), to_cbor(class)?);
                if self.config.instance_index {
                    batch.put(keys::instance(class, id), Vec::new());
                }
                self.apply(batch)
            }
        }
    }

    fn all_instances_of_any(&self, classes: &BTreeSet<ClassDescriptor>) -> CoreResult<Vec<Id>> {
        self.ensure_open()?;
        let mut found = BTreeSet::new();
        if self.config.instance_index {
            for class in classes {
                for (key, _) in self.store.scan_prefix(&keys::instance_prefix(class))? {
                    found.insert(keys::parse_instance(&key)?);
                }
            }
        } else if self.config.scan_fallback {
            debug!(classes = classes.len(), "scanning class bindings");
            for (key, value) in self.store.scan_prefix(&keys::tag_prefix(keys::CLASS))? {
                let class: ClassDescriptor = from_cbor(&value)?;
                if classes.contains(&class) {
                    found.insert(keys::parse_owner(&key, keys::CLASS)?);
                }
            }
        } else {
            return Err(CoreError::unsupported_lookup(
                self.name(),
                "no instance index and scan fallback is disabled",
            ));
        }
        Ok(found.into_iter().collect())
    }

    fn entities(&self) -> CoreResult<Vec<Id>> {
        self.ensure_open()?;
        let mut ids = BTreeSet::new();
        for tag in [keys::SINGLE, keys::CLASS, keys::CONTAINER] {
            self.owners_with_tag(tag, &mut ids)?;
        }
        ids.extend(self.encoding.owners(self.store.as_ref())?);
        Ok(ids.into_iter().collect())
    }

    fn features_of(&self, id: &Id) -> CoreResult<Vec<StoredFeature>> {
        self.ensure_open()?;
        let mut features = Vec::new();
        for (key, _) in self.store.scan_prefix(&keys::owner(keys::SINGLE, id))? {
            let (_, name) = keys::parse_feature(&key, keys::SINGLE)?;
            features.push(StoredFeature {
                name,
                shape: StoredShape::Single,
            });
        }
        for name in self.encoding.features_of(self.store.as_ref(), id)? {
            features.push(StoredFeature {
                name,
                shape: StoredShape::Many,
            });
        }
        Ok(features)
    }

    fn remove(&self, id: &Id) -> CoreResult<()> {
        self.ensure_open()?;
        let store = self.store.as_ref();
        let mut batch = WriteBatch::new();
        for (key, _) in store.scan_prefix(&keys::owner(keys::SINGLE, id))? {
            batch.delete(key);
        }
        for name in self.encoding.features_of(store, id)? {
            let key = SingleFeatureKey::new(*id, name);
            batch.extend(self.encoding.clear(store, &key)?);
        }
        if let Some(class) = self.class_of(id)? {
            batch.delete(keys::instance(&class, id));
        }
        batch
            .delete(keys::owner(keys::CLASS, id))
            .delete(keys::owner(keys::CONTAINER, id));
        debug!(%id, records = batch.len(), "removing entity");
        self.apply(batch)
    }

    fn copy_to(&self, target: &dyn DataMapper) -> CoreResult<CopyReport> {
        self.ensure_open()?;
        if let Some(other) = target.as_any().downcast_ref::<KvBackend>() {
            // Only the metadata record may exist in the target
            let target_empty = other.store.len()? <= 1;
            if other.metadata() == self.metadata() && target_empty {
                return self.copy_raw(other);
            }
        }
        copy_all(self, target)
    }

    fn save(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.store.flush()?;
        debug!(store = self.store.name(), "saved key-value backend");
        Ok(())
    }

    fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let flushed = self.store.flush();
        let closed = self.store.close();
        info!(store = self.store.name(), "closed key-value backend");
        flushed?;
        closed?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for KvBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close key-value backend");
        }
    }
}

/// Counts the records of `store` per record kind, in tag order.
///
/// # Errors
///
/// Returns an error if the store cannot be scanned.
pub fn record_histogram(store: &dyn KeyValueStore) -> CoreResult<Vec<(&'static str, u64)>> {
    let mut counts: std::collections::BTreeMap<u8, u64> = std::collections::BTreeMap::new();
    for (key, _) in store.scan_prefix(&[])? {
        if let Some(&tag) = key.first() {
            *counts.entry(tag).or_default() += 1;
        }
    }
    Ok(counts
        .into_iter()
        .map(|(tag, n)| (keys::record_kind(tag), n))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_backend::GraphBackend;
    use modelstore_codec::Value;
    use modelstore_storage::{LogStore, LogStoreOptions};
    use tempfile::tempdir;

    fn text(s: &str) -> Slot {
        Slot::Value(Value::from(s))
    }

    fn shape() -> ClassDescriptor {
        ClassDescriptor::new("urn:shapes", "Shape")
    }

    #[test]
    fn fresh_store_is_stamped() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let config = BackendConfig::new().encoding(EncodingKind::Array);
        let backend = KvBackend::open(Arc::clone(&store), config).unwrap();

        let found = KvBackend::read_metadata(store.as_ref()).unwrap().unwrap();
        assert_eq!(found, backend.metadata());
        assert_eq!(found.encoding, EncodingKind::Array);
        assert_eq!(found.format_version, FORMAT_VERSION);
    }

    #[test]
    fn layout_mismatch_is_rejected() {
        let meta = StoreMetadata {
            format_version: FORMAT_VERSION,
            encoding: EncodingKind::List,
            instance_index: true,
        };
        let store = Arc::new(MemoryStore::with_entries(vec![(
            keys::meta(),
            to_cbor(&meta).unwrap(),
        )]));

        let err = KvBackend::open(store.clone(), BackendConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));

        let backend = KvBackend::open_existing(store, BackendConfig::default()).unwrap();
        assert_eq!(backend.config().encoding, EncodingKind::List);
    }

    #[test]
    fn foreign_records_without_metadata_are_rejected() {
        let store = Arc::new(MemoryStore::with_entries(vec![(b"x".to_vec(), b"y".to_vec())]));
        let err = KvBackend::open(store, BackendConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn single_features_return_previous() {
        let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
        let key = SingleFeatureKey::new(Id::generate(), "name");

        assert_eq!(backend.set_single(&key, text("a")).unwrap(), None);
        assert_eq!(backend.set_single(&key, text("b")).unwrap(), Some(text("a")));
        assert!(backend.has(&key).unwrap());
        assert_eq!(backend.unset_single(&key).unwrap(), Some(text("b")));
        assert!(!backend.has(&key).unwrap());
    }

    #[test]
    fn typed_accessors_check_kinds() {
        let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
        let key = SingleFeatureKey::new(Id::generate(), "items");
        let target = Id::generate();

        backend.append_value(&key, Value::from(1)).unwrap();
        backend.append_reference(&key, target).unwrap();
        assert_eq!(backend.value_at(&key.with_position(0)).unwrap(), Value::from(1));
        assert_eq!(backend.reference_at(&key.with_position(1)).unwrap(), target);
        assert!(matches!(
            backend.reference_at(&key.with_position(0)),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn move_between_features_is_atomic() {
        for encoding in EncodingKind::ALL {
            let backend = KvBackend::in_memory(BackendConfig::new().encoding(encoding)).unwrap();
            let owner = Id::generate();
            let from = SingleFeatureKey::new(owner, "left");
            let to = SingleFeatureKey::new(owner, "right");
            backend.append_all(&from, vec![text("a"), text("b")]).unwrap();
            backend.append(&to, text("c")).unwrap();

            let moved = backend
                .move_slot(&from.with_position(0), &to.with_position(1))
                .unwrap();
            assert_eq!(moved, text("a"));
            assert_eq!(backend.all_of(&from).unwrap(), vec![text("b")]);
            assert_eq!(backend.all_of(&to).unwrap(), vec![text("c"), text("a")]);

            let err = backend
                .move_slot(&from.with_position(0), &to.with_position(5))
                .unwrap_err();
            assert!(matches!(err, CoreError::IndexOutOfRange { .. }), "{encoding}");
            assert_eq!(backend.size_of(&from).unwrap(), 1);
        }
    }

    #[test]
    fn class_binding_is_write_once() {
        let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
        let id = Id::generate();

        backend.class_for(&id, &shape()).unwrap();
        backend.class_for(&id, &shape()).unwrap();
        let err = backend
            .class_for(&id, &ClassDescriptor::new("urn:shapes", "Circle"))
            .unwrap_err();
        assert!(matches!(err, CoreError::ClassAlreadyExists { .. }));
        assert_eq!(backend.class_of(&id).unwrap(), Some(shape()));
    }

    #[test]
    fn instance_lookup_needs_index_or_scan() {
        let indexed = KvBackend::in_memory(BackendConfig::default()).unwrap();
        let plain = KvBackend::in_memory(BackendConfig::new().instance_index(false)).unwrap();
        let scanning = KvBackend::in_memory(
            BackendConfig::new().instance_index(false).scan_fallback(true),
        )
        .unwrap();
        let id = Id::generate();
        let classes = BTreeSet::from([shape()]);

        for backend in [&indexed, &plain, &scanning] {
            backend.class_for(&id, &shape()).unwrap();
        }
        assert_eq!(indexed.all_instances_of_any(&classes).unwrap(), vec![id]);
        assert_eq!(scanning.all_instances_of_any(&classes).unwrap(), vec![id]);
        let err = plain.all_instances_of_any(&classes).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedLookup { .. }));
    }

    #[test]
    fn remove_deletes_every_record() {
        for encoding in EncodingKind::ALL {
            let store = Arc::new(MemoryStore::new());
            let backend =
                KvBackend::open(store.clone(), BackendConfig::new().encoding(encoding)).unwrap();
            let id = Id::generate();
            backend.class_for(&id, &shape()).unwrap();
            backend.set_single(&SingleFeatureKey::new(id, "name"), text("x")).unwrap();
            backend
                .append_all(&SingleFeatureKey::new(id, "tags"), vec![text("a"), text("b")])
                .unwrap();
            backend
                .container_for(&id, ContainerEdge::new(Id::generate(), "children"))
                .unwrap();

            backend.remove(&id).unwrap();
            assert!(backend.entities().unwrap().is_empty(), "{encoding}");
            // Only the metadata record survives
            assert_eq!(store.len().unwrap(), 1, "{encoding}");
        }
    }

    #[test]
    fn raw_copy_between_matching_layouts() {
        let source = KvBackend::in_memory(BackendConfig::default()).unwrap();
        let target = KvBackend::in_memory(BackendConfig::default()).unwrap();
        let id = Id::generate();
        source.class_for(&id, &shape()).unwrap();
        source
            .append_all(&SingleFeatureKey::new(id, "tags"), vec![text("a"), text("b")])
            .unwrap();

        let report = source.copy_to(&target).unwrap();
        assert!(report.fast_path);
        assert_eq!(report.entities, 1);
        assert_eq!(target.class_of(&id).unwrap(), Some(shape()));
        assert_eq!(
            target.all_of(&SingleFeatureKey::new(id, "tags")).unwrap(),
            vec![text("a"), text("b")]
        );
    }

    #[test]
    fn generic_copy_across_backends() {
        let source = KvBackend::in_memory(BackendConfig::new().encoding(EncodingKind::List)).unwrap();
        let graph = GraphBackend::in_memory();
        let (parent, child) = (Id::generate(), Id::generate());
        source.class_for(&parent, &shape()).unwrap();
        source.class_for(&child, &shape()).unwrap();
        source.set_single(&SingleFeatureKey::new(parent, "name"), text("p")).unwrap();
        source
            .append(&SingleFeatureKey::new(parent, "children"), Slot::Reference(child))
            .unwrap();
        source
            .container_for(&child, ContainerEdge::new(parent, "children"))
            .unwrap();

        let report = source.copy_to(&graph).unwrap();
        assert!(!report.fast_path);
        assert_eq!(report.entities, 2);

        let back = KvBackend::in_memory(BackendConfig::new().encoding(EncodingKind::Indexed)).unwrap();
        graph.copy_to(&back).unwrap();
        // Copying twice yields the same target
        graph.copy_to(&back).unwrap();
        for mapper in [&graph as &dyn DataMapper, &back] {
            assert_eq!(
                mapper.get_single(&SingleFeatureKey::new(parent, "name")).unwrap(),
                Some(text("p"))
            );
            assert_eq!(
                mapper.all_of(&SingleFeatureKey::new(parent, "children")).unwrap(),
                vec![Slot::Reference(child)]
            );
            assert_eq!(
                mapper.container_of(&child).unwrap(),
                Some(ContainerEdge::new(parent, "children"))
            );
            assert_eq!(mapper.class_of(&child).unwrap(), Some(shape()));
        }
    }

    #[test]
    fn log_store_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.log");
        let id = Id::generate();
        let key = SingleFeatureKey::new(id, "items");
        {
            let store = Arc::new(LogStore::open(&path, LogStoreOptions::default()).unwrap());
            let backend =
                KvBackend::open(store, BackendConfig::new().encoding(EncodingKind::List)).unwrap();
            backend.class_for(&id, &shape()).unwrap();
            backend.append_all(&key, vec![text("a"), text("c")]).unwrap();
            backend.insert_at(&key.with_position(1), text("b")).unwrap();
            backend.close().unwrap();
        }

        let store = Arc::new(LogStore::open(&path, LogStoreOptions::default()).unwrap());
        let backend = KvBackend::open_existing(store, BackendConfig::default()).unwrap();
        assert_eq!(backend.config().encoding, EncodingKind::List);
        assert_eq!(backend.class_of(&id).unwrap(), Some(shape()));
        assert_eq!(
            backend.all_of(&key).unwrap(),
            vec![text("a"), text("b"), text("c")]
        );
    }

    #[test]
    fn close_is_idempotent() {
        let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
        backend.save().unwrap();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(backend.is_closed());
        assert!(matches!(backend.save(), Err(CoreError::BackendClosed)));
    }

    #[test]
    fn histogram_groups_by_record_kind() {
        let store = Arc::new(MemoryStore::new());
        let backend = KvBackend::open(store.clone(), BackendConfig::default()).unwrap();
        let id = Id::generate();
        backend.class_for(&id, &shape()).unwrap();
        backend.set_single(&SingleFeatureKey::new(id, "name"), text("x")).unwrap();

        let histogram = record_histogram(store.as_ref()).unwrap();
        let total: u64 = histogram.iter().map(|(_, n)| n).sum();
        assert_eq!(total, store.len().unwrap() as u64);
        assert!(histogram.iter().any(|(kind, n)| *kind == keys::record_kind(keys::CLASS) && *n == 1));
    }

    #[test]
    fn reads_never_observe_half_applied_writes() {
        for encoding in EncodingKind::ALL {
            let backend = KvBackend::in_memory(BackendConfig::new().encoding(encoding)).unwrap();
            let key = SingleFeatureKey::new(Id::generate(), "items");
            backend
                .append_all(&key, vec![text("a"), text("b"), text("c")])
                .unwrap();

            std::thread::scope(|s| {
                s.spawn(|| {
                    for _ in 0..200 {
                        backend.insert_at(&key.with_position(0), text("x")).unwrap();
                        backend.remove_at(&key.with_position(0)).unwrap();
                    }
                });
                s.spawn(|| {
                    for _ in 0..200 {
                        let size = backend.size_of(&key).unwrap();
                        assert!((3..=4).contains(&size), "{encoding}: size {size}");
                        backend.get_at(&key.with_position(1)).unwrap();
                        let all = backend.all_of(&key).unwrap();
                        assert!((3..=4).contains(&all.len()), "{encoding}");
                        assert!(backend.contains(&key, &text("c")).unwrap());
                    }
                });
            });

            assert_eq!(backend.all_of(&key).unwrap(), vec![text("a"), text("b"), text("c")]);
        }
    }
}
