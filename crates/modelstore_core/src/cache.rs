//! Bounded caches and the feature-caching decorator.

use crate::class::ClassDescriptor;
use crate::config::CacheConfig;
use crate::copy::CopyReport;
use crate::error::{CoreError, CoreResult};
use crate::feature::{ContainerEdge, ManyFeatureKey, SingleFeatureKey, Slot, StoredFeature};
use crate::id::Id;
use crate::locks::FeatureLocks;
use crate::mapper::DataMapper;
use crate::stats::CacheStats;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use tracing::{debug, trace};

/// A least-recently-used map with a fixed capacity.
///
/// A capacity of zero disables caching: inserts are dropped and every
/// lookup misses.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    state: Mutex<LruState<K, V>>,
}

#[derive(Debug)]
struct LruState<K, V> {
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> LruState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn touch(&mut self, key: &K) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, last)) = self.entries.get_mut(key) {
            self.order.remove(last);
            *last = tick;
            self.order.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let (value, tick) = self.entries.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    /// Returns a copy of the cached value and marks it recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let value = state.entries.get(key).map(|(v, _)| v.clone())?;
        state.touch(key);
        Some(value)
    }

    /// Inserts or replaces an entry, evicting the least recently used one
    /// when full.
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.remove(&key);
        while state.entries.len() >= self.capacity {
            let Some((_, oldest)) = state.order.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
        }
        state.tick += 1;
        let tick = state.tick;
        state.order.insert(tick, key.clone());
        state.entries.insert(key, (value, tick));
    }

    /// Removes an entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.lock().remove(key)
    }

    /// Removes every entry whose key matches `predicate`; returns how many
    /// were removed.
    pub fn invalidate_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<K> = state.entries.keys().filter(|k| predicate(k)).cloned().collect();
        for key in &doomed {
            state.remove(key);
        }
        doomed.len()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// `(owner, feature, position)`; single-valued entries have no position.
type FeatureCacheKey = (Id, String, Option<u32>);

/// `(owner, feature)` of a memoized size.
type SizeCacheKey = (Id, String);

/// A [`DataMapper`] decorator memoizing feature reads.
///
/// Every structural mutation invalidates the cached positions whose
/// element moved, after the wrapped mapper returned successfully. Reads
/// through the decorator always match reads through the wrapped mapper.
///
/// Sizes of many-valued features are memoized as well, so `size_of` and
/// `has` answer from memory until the feature is mutated.
///
/// Moving an element between two different features is not supported
/// and fails with [`CoreError::UnsupportedOperation`] before anything is
/// changed.
///
/// # Example
///
/// ```rust
/// use modelstore_core::{
///     BackendConfig, CacheConfig, DataMapper, FeatureCachingMapper, Id, KvBackend,
///     SingleFeatureKey, Slot,
/// };
///
/// let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
/// let cached = FeatureCachingMapper::new(backend, CacheConfig::default());
///
/// let key = SingleFeatureKey::new(Id::generate(), "items");
/// cached.append(&key, Slot::Value("a".into())).unwrap();
/// cached.get_at(&key.with_position(0)).unwrap();
/// cached.get_at(&key.with_position(0)).unwrap();
/// assert_eq!(cached.stats().hits(), 1);
/// ```
#[derive(Debug)]
pub struct FeatureCachingMapper<M> {
    inner: M,
    features: BoundedCache<FeatureCacheKey, Option<Slot>>,
    sizes: BoundedCache<SizeCacheKey, u32>,
    classes: Option<BoundedCache<Id, ClassDescriptor>>,
    locks: FeatureLocks,
    stats: CacheStats,
}

impl<M: DataMapper + 'static> FeatureCachingMapper<M> {
    /// Wraps `inner`.
    pub fn new(inner: M, config: CacheConfig) -> Self {
        debug!(
            mapper = inner.name(),
            capacity = config.capacity,
            cache_classes = config.cache_classes,
            "enabled feature cache"
        );
        Self {
            inner,
            features: BoundedCache::new(config.capacity),
            sizes: BoundedCache::new(config.capacity),
            classes: config
                .cache_classes
                .then(|| BoundedCache::new(config.capacity)),
            locks: FeatureLocks::new(config.lock_stripes),
            stats: CacheStats::new(),
        }
    }

    /// Returns the wrapped mapper.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Unwraps the decorator.
    pub fn into_inner(self) -> M {
        self.inner
    }

    /// Returns the cache counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the number of cached feature entries.
    pub fn cached_entries(&self) -> usize {
        self.features.len()
    }

    /// Returns the number of memoized feature sizes.
    pub fn cached_sizes(&self) -> usize {
        self.sizes.len()
    }

    fn size_entry(key: &SingleFeatureKey) -> SizeCacheKey {
        (key.owner, key.name.clone())
    }

    /// Size lookup for callers already holding the feature lock.
    fn size_locked(&self, key: &SingleFeatureKey) -> CoreResult<u32> {
        let entry = Self::size_entry(key);
        if let Some(size) = self.sizes.get(&entry) {
            self.stats.record_hit();
            return Ok(size);
        }
        self.stats.record_miss();
        let size = self.inner.size_of(key)?;
        self.sizes.insert(entry, size);
        Ok(size)
    }

    fn forget_size(&self, key: &SingleFeatureKey) {
        if self.sizes.remove(&Self::size_entry(key)).is_some() {
            self.stats.record_invalidations(1);
        }
    }

    fn single_entry(key: &SingleFeatureKey) -> FeatureCacheKey {
        (key.owner, key.name.clone(), None)
    }

    fn many_entry(key: &SingleFeatureKey, position: u32) -> FeatureCacheKey {
        (key.owner, key.name.clone(), Some(position))
    }

    fn populate(&self, entry: FeatureCacheKey, slot: Option<Slot>) {
        self.features.insert(entry, slot);
        self.stats.record_population();
    }

    /// Drops the cached positions in `[from, to)` of one feature.
    fn invalidate_range(&self, key: &SingleFeatureKey, from: u32, to: u32) {
        if from >= to {
            return;
        }
        let removed = if (to - from) as usize > self.features.len() {
            self.features.invalidate_where(|(owner, name, position)| {
                *owner == key.owner
                    && *name == key.name
                    && position.is_some_and(|p| p >= from && p < to)
            })
        } else {
            (from..to)
                .filter(|p| self.features.remove(&Self::many_entry(key, *p)).is_some())
                .count()
        };
        trace!(feature = %key, from, to, removed, "invalidated cached positions");
        self.stats.record_invalidations(removed as u64);
    }

    fn invalidate_single(&self, key: &SingleFeatureKey) {
        if self.features.remove(&Self::single_entry(key)).is_some() {
            self.stats.record_invalidations(1);
        }
    }
}

impl<M: DataMapper + 'static> DataMapper for FeatureCachingMapper<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        let entry = Self::single_entry(key);
        let _guard = self.locks.lock(&key.owner, &key.name);
        if let Some(slot) = self.features.get(&entry) {
            self.stats.record_hit();
            return Ok(slot);
        }
        self.stats.record_miss();
        let slot = self.inner.get_single(key)?;
        self.features.insert(entry, slot.clone());
        Ok(slot)
    }

    fn set_single(&self, key: &SingleFeatureKey, slot: Slot) -> CoreResult<Option<Slot>> {
        let _guard = self.locks.lock(&key.owner, &key.name);
        let previous = self.inner.set_single(key, slot.clone())?;
        self.forget_size(key);
        self.populate(Self::single_entry(key), Some(slot));
        Ok(previous)
    }

    fn unset_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        let _guard = self.locks.lock(&key.owner, &key.name);
        let previous = self.inner.unset_single(key)?;
        self.forget_size(key);
        self.invalidate_single(key);
        Ok(previous)
    }

    fn get_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        let feature = key.without_position();
        let entry = Self::many_entry(&feature, key.position);
        let _guard = self.locks.lock(&key.owner, &key.name);
        if let Some(Some(slot)) = self.features.get(&entry) {
            self.stats.record_hit();
            return Ok(slot);
        }
        self.stats.record_miss();
        let slot = self.inner.get_at(key)?;
        self.features.insert(entry, Some(slot.clone()));
        Ok(slot)
    }

    fn set_at(&self, key: &ManyFeatureKey, slot: Slot) -> CoreResult<Slot> {
        let feature = key.without_position();
        let _guard = self.locks.lock(&key.owner, &key.name);
        let previous = self.inner.set_at(key, slot.clone())?;
        self.populate(Self::many_entry(&feature, key.position), Some(slot));
        Ok(previous)
    }

    fn insert_all_at(&self, key: &ManyFeatureKey, slots: Vec<Slot>) -> CoreResult<()> {
        let feature = key.without_position();
        let _guard = self.locks.lock(&key.owner, &key.name);
        let size = self.size_locked(&feature)?;
        let added = u32::try_from(slots.len()).unwrap_or(u32::MAX);
        self.inner.insert_all_at(key, slots.clone())?;
        self.sizes
            .insert(Self::size_entry(&feature), size.saturating_add(added));

        let first_shifted = key.position.saturating_add(added);
        self.invalidate_range(&feature, first_shifted, size.saturating_add(added));
        for (offset, slot) in (0..added).zip(slots) {
            self.populate(Self::many_entry(&feature, key.position + offset), Some(slot));
        }
        Ok(())
    }

    fn append_all(&self, key: &SingleFeatureKey, slots: Vec<Slot>) -> CoreResult<u32> {
        let _guard = self.locks.lock(&key.owner, &key.name);
        let added = u32::try_from(slots.len()).unwrap_or(u32::MAX);
        let first = self.inner.append_all(key, slots.clone())?;
        self.sizes
            .insert(Self::size_entry(key), first.saturating_add(added));
        for (position, slot) in (first..).zip(slots) {
            self.populate(Self::many_entry(key, position), Some(slot));
        }
        Ok(first)
    }

    fn remove_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        let feature = key.without_position();
        let _guard = self.locks.lock(&key.owner, &key.name);
        let size = self.size_locked(&feature)?;
        let removed = self.inner.remove_at(key)?;
        self.sizes
            .insert(Self::size_entry(&feature), size.saturating_sub(1));
        self.invalidate_range(&feature, key.position, size);
        Ok(removed)
    }

    fn move_slot(&self, source: &ManyFeatureKey, target: &ManyFeatureKey) -> CoreResult<Slot> {
        if !source.same_feature(target) {
            return Err(CoreError::unsupported_operation(format!(
                "the feature cache cannot move elements between features ({source} -> {target})"
            )));
        }
        let feature = source.without_position();
        let _guard = self.locks.lock(&source.owner, &source.name);
        let moved = self.inner.move_slot(source, target)?;
        let low = source.position.min(target.position);
        let high = source.position.max(target.position);
        self.invalidate_range(&feature, low, high.saturating_add(1));
        Ok(moved)
    }

    fn clear(&self, key: &SingleFeatureKey) -> CoreResult<()> {
        let _guard = self.locks.lock(&key.owner, &key.name);
        let size = self.size_locked(key)?;
        self.inner.clear(key)?;
        self.sizes.insert(Self::size_entry(key), 0);
        self.invalidate_range(key, 0, size);
        self.invalidate_single(key);
        Ok(())
    }

    fn size_of(&self, key: &SingleFeatureKey) -> CoreResult<u32> {
        let _guard = self.locks.lock(&key.owner, &key.name);
        self.size_locked(key)
    }

    fn all_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        self.inner.all_of(key)
    }

    fn container_of(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.inner.container_of(id)
    }

    fn container_for(&self, id: &Id, edge: ContainerEdge) -> CoreResult<Option<ContainerEdge>> {
        self.inner.container_for(id, edge)
    }

    fn remove_container(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.inner.remove_container(id)
    }

    fn class_of(&self, id: &Id) -> CoreResult<Option<ClassDescriptor>> {
        let Some(classes) = &self.classes else {
            return self.inner.class_of(id);
        };
        if let Some(class) = classes.get(id) {
            self.stats.record_hit();
            return Ok(Some(class));
        }
        self.stats.record_miss();
        let class = self.inner.class_of(id)?;
        // Bindings are write-once, so only present ones are memoized
        if let Some(class) = &class {
            classes.insert(*id, class.clone());
        }
        Ok(class)
    }

    fn class_for(&self, id: &Id, class: &ClassDescriptor) -> CoreResult<()> {
        self.inner.class_for(id, class)?;
        if let Some(classes) = &self.classes {
            classes.insert(*id, class.clone());
        }
        Ok(())
    }

    fn all_instances_of_any(&self, classes: &BTreeSet<ClassDescriptor>) -> CoreResult<Vec<Id>> {
        self.inner.all_instances_of_any(classes)
    }

    fn entities(&self) -> CoreResult<Vec<Id>> {
        self.inner.entities()
    }

    fn features_of(&self, id: &Id) -> CoreResult<Vec<StoredFeature>> {
        self.inner.features_of(id)
    }

    fn remove(&self, id: &Id) -> CoreResult<()> {
        self.inner.remove(id)?;
        let removed = self.features.invalidate_where(|(owner, _, _)| owner == id)
            + self.sizes.invalidate_where(|(owner, _)| owner == id);
        self.stats.record_invalidations(removed as u64);
        if let Some(classes) = &self.classes {
            classes.remove(id);
        }
        Ok(())
    }

    fn copy_to(&self, target: &dyn DataMapper) -> CoreResult<CopyReport> {
        self.inner.copy_to(target)
    }

    fn save(&self) -> CoreResult<()> {
        self.inner.save()
    }

    fn close(&self) -> CoreResult<()> {
        self.features.clear();
        self.sizes.clear();
        if let Some(classes) = &self.classes {
            classes.clear();
        }
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
