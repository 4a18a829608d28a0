//! Typed store façade.
//!
//! [`ModelStore`] ties a [`DataMapper`] to a [`MetaModel`]: it dispatches
//! every operation on the feature's [`FeatureKind`], rejects elements of
//! the wrong kind, keeps containment edges consistent through the
//! [`ContainmentTracker`] and reifies entity handles through a bounded
//! cache.

use crate::cache::BoundedCache;
use crate::class::ClassDescriptor;
use crate::config::StoreConfig;
use crate::containment::ContainmentTracker;
use crate::error::{CoreError, CoreResult};
use crate::feature::{ContainerEdge, SingleFeatureKey, Slot};
use crate::id::Id;
use crate::mapper::DataMapper;
use crate::meta::{FeatureDescriptor, FeatureKind, MetaModel, Multiplicity};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A reified entity handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    /// Identifier.
    pub id: Id,
    /// Class the entity is bound to.
    pub class: ClassDescriptor,
}

/// The store façade.
///
/// Operations on containment features rewrite records of both holders
/// and of the child. They run one at a time across the whole store, so
/// concurrent callers never leave a child listed by two holders. Other
/// features go straight to the mapper.
///
/// # Example
///
/// ```rust
/// use modelstore_core::{
///     BackendConfig, ClassDescriptor, ClassInfo, FeatureDescriptor, Id, KvBackend,
///     MetaModelRegistry, ModelStore, Multiplicity, Slot, StoreConfig,
/// };
/// use std::sync::Arc;
///
/// let folder = ClassDescriptor::new("urn:fs", "Folder");
/// let children = FeatureDescriptor::containment("children", Multiplicity::Many);
/// let meta = MetaModelRegistry::new()
///     .with(ClassInfo::new(folder.clone()).feature(children.clone()));
///
/// let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
/// let store = ModelStore::new(backend, Arc::new(meta), StoreConfig::default());
///
/// let (a, b, c) = (Id::generate(), Id::generate(), Id::generate());
/// for id in [a, b, c] {
///     store.create(id, &folder).unwrap();
/// }
/// store.append(&a, &children, Slot::Reference(c)).unwrap();
/// store.append(&b, &children, Slot::Reference(c)).unwrap();
///
/// assert_eq!(store.size(&a, &children).unwrap(), 0);
/// assert_eq!(store.container_of(&c).unwrap().unwrap().container, b);
/// ```
pub struct ModelStore<M> {
    meta: Arc<dyn MetaModel>,
    mapper: M,
    tracker: ContainmentTracker,
    containment: Mutex<()>,
    entities: BoundedCache<Id, Entity>,
}

impl<M: fmt::Debug> fmt::Debug for ModelStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStore")
            .field("mapper", &self.mapper)
            .field("reified", &self.entities.len())
            .finish_non_exhaustive()
    }
}

fn expect_single(feature: &FeatureDescriptor) -> CoreResult<()> {
    match feature.multiplicity() {
        Multiplicity::Single => Ok(()),
        Multiplicity::Many => Err(CoreError::type_mismatch(
            &feature.name,
            "single-valued feature",
        )),
    }
}

fn expect_many(feature: &FeatureDescriptor) -> CoreResult<()> {
    match feature.multiplicity() {
        Multiplicity::Many => Ok(()),
        Multiplicity::Single => Err(CoreError::type_mismatch(
            &feature.name,
            "many-valued feature",
        )),
    }
}

fn check_slot(feature: &FeatureDescriptor, slot: &Slot) -> CoreResult<()> {
    match (feature.kind, slot) {
        (FeatureKind::Attribute(_), Slot::Value(_))
        | (FeatureKind::Reference { .. }, Slot::Reference(_)) => Ok(()),
        (FeatureKind::Attribute(_), Slot::Reference(_)) => {
            Err(CoreError::type_mismatch(&feature.name, "attribute value"))
        }
        (FeatureKind::Reference { .. }, Slot::Value(_)) => {
            Err(CoreError::type_mismatch(&feature.name, "reference"))
        }
    }
}

/// Returns the child written by `slot` when `feature` is a containment.
fn contained(feature: &FeatureDescriptor, slot: &Slot) -> Option<Id> {
    if feature.is_containment() {
        slot.as_reference()
    } else {
        None
    }
}

impl<M: DataMapper> ModelStore<M> {
    /// Creates a façade over `mapper`.
    pub fn new(mapper: M, meta: Arc<dyn MetaModel>, config: StoreConfig) -> Self {
        info!(
            mapper = mapper.name(),
            reified_capacity = config.reified_capacity,
            "opened model store"
        );
        Self {
            meta,
            mapper,
            tracker: ContainmentTracker::new(),
            containment: Mutex::new(()),
            entities: BoundedCache::new(config.reified_capacity),
        }
    }

    /// Returns the mapper.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Returns the metamodel.
    pub fn meta(&self) -> &dyn MetaModel {
        self.meta.as_ref()
    }

    /// Returns the number of reified handles currently cached.
    pub fn cached_entities(&self) -> usize {
        self.entities.len()
    }

    // === Entities ===

    /// Creates an entity of `class`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] for classes missing from the
    /// metamodel or abstract ones, and [`CoreError::ClassAlreadyExists`]
    /// if `id` is bound to another class.
    pub fn create(&self, id: Id, class: &ClassDescriptor) -> CoreResult<Entity> {
        if !self.meta.contains_class(class) {
            return Err(CoreError::UnknownClass {
                class: class.to_string(),
                reason: "not described by the metamodel",
            });
        }
        if self.meta.is_abstract(class) {
            return Err(CoreError::UnknownClass {
                class: class.to_string(),
                reason: "abstract",
            });
        }
        self.mapper.class_for(&id, class)?;
        let entity = Entity {
            id,
            class: class.clone(),
        };
        self.entities.insert(id, entity.clone());
        debug!(%id, %class, "created entity");
        Ok(entity)
    }

    /// Returns the handle of `id`, or `None` if it has no class binding.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn resolve(&self, id: &Id) -> CoreResult<Option<Entity>> {
        if let Some(entity) = self.entities.get(id) {
            return Ok(Some(entity));
        }
        let Some(class) = self.mapper.class_of(id)? else {
            return Ok(None);
        };
        let entity = Entity { id: *id, class };
        self.entities.insert(*id, entity.clone());
        Ok(Some(entity))
    }

    /// Looks up a feature of the class of `id`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn feature(&self, id: &Id, name: &str) -> CoreResult<Option<FeatureDescriptor>> {
        Ok(self
            .resolve(id)?
            .and_then(|entity| self.meta.feature(&entity.class, name)))
    }

    /// Returns the container edge of `id`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn container_of(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.mapper.container_of(id)
    }

    /// Returns the instances of `class`, and of its subtypes unless
    /// `strict`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedLookup`] if the mapper cannot
    /// answer instance lookups.
    pub fn all_instances_of(&self, class: &ClassDescriptor, strict: bool) -> CoreResult<Vec<Id>> {
        self.mapper.all_instances_of(self.meta.as_ref(), class, strict)
    }

    /// Deletes `id` and its containment subtree, detaching it from its
    /// container first. Returns the number of deleted entities.
    ///
    /// Non-containment references to deleted entities are left dangling.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn delete(&self, id: &Id) -> CoreResult<u64> {
        let _guard = self.containment.lock();
        self.tracker.detach(&self.mapper, id)?;

        let mut pending = vec![*id];
        let mut visited = BTreeSet::new();
        while let Some(next) = pending.pop() {
            if !visited.insert(next) {
                continue;
            }
            if let Some(class) = self.mapper.class_of(&next)? {
                for feature in self.meta.features(&class) {
                    if !feature.is_containment() {
                        continue;
                    }
                    let key = SingleFeatureKey::new(next, feature.name.clone());
                    let children = match feature.multiplicity() {
                        Multiplicity::Single => self.mapper.get_single(&key)?.into_iter().collect(),
                        Multiplicity::Many => self.mapper.all_of(&key)?,
                    };
                    pending.extend(children.iter().filter_map(Slot::as_reference));
                }
            }
            self.mapper.remove(&next)?;
            self.entities.remove(&next);
        }
        debug!(%id, deleted = visited.len(), "deleted containment subtree");
        Ok(visited.len() as u64)
    }

    // === Single-valued features ===

    /// Reads a single-valued feature.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for many-valued features.
    pub fn get(&self, id: &Id, feature: &FeatureDescriptor) -> CoreResult<Option<Slot>> {
        expect_single(feature)?;
        self.mapper.get_single(&Self::key(id, feature))
    }

    /// Writes a single-valued feature, returning the previous element.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for many-valued features or a
    /// slot of the wrong kind.
    pub fn set(&self, id: &Id, feature: &FeatureDescriptor, slot: Slot) -> CoreResult<Option<Slot>> {
        expect_single(feature)?;
        check_slot(feature, &slot)?;
        let key = Self::key(id, feature);
        let _guard = self.containment_guard(feature);
        if let Some(child) = contained(feature, &slot) {
            self.tracker.attach(&self.mapper, &child, &key)?;
        }
        let previous = self.mapper.set_single(&key, slot.clone())?;
        self.release_replaced(feature, &key, previous.as_ref(), Some(&slot))?;
        Ok(previous)
    }

    /// Returns `true` if the feature holds anything.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn is_set(&self, id: &Id, feature: &FeatureDescriptor) -> CoreResult<bool> {
        let key = Self::key(id, feature);
        match feature.multiplicity() {
            Multiplicity::Single => Ok(self.mapper.get_single(&key)?.is_some()),
            Multiplicity::Many => Ok(self.mapper.size_of(&key)? > 0),
        }
    }

    /// Unsets a feature; many-valued features are cleared.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn unset(&self, id: &Id, feature: &FeatureDescriptor) -> CoreResult<()> {
        if feature.is_many() {
            return self.clear(id, feature);
        }
        let key = Self::key(id, feature);
        let _guard = self.containment_guard(feature);
        let previous = self.mapper.unset_single(&key)?;
        self.release_replaced(feature, &key, previous.as_ref(), None)
    }

    // === Many-valued features ===

    /// Reads one element.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position >= size`.
    pub fn get_at(&self, id: &Id, feature: &FeatureDescriptor, position: u32) -> CoreResult<Slot> {
        expect_many(feature)?;
        self.mapper
            .get_at(&Self::key(id, feature).with_position(position))
    }

    /// Replaces one element, returning the previous one.
    ///
    /// Writing a child already held elsewhere in the same containment
    /// feature moves it: its old occurrence is removed first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position >= size`.
    pub fn set_at(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        position: u32,
        slot: Slot,
    ) -> CoreResult<Slot> {
        expect_many(feature)?;
        check_slot(feature, &slot)?;
        let key = Self::key(id, feature);
        let Some(child) = contained(feature, &slot) else {
            return self.mapper.set_at(&key.with_position(position), slot);
        };

        let _guard = self.containment.lock();
        let size = self.mapper.size_of(&key)?;
        if position >= size {
            return Err(CoreError::index_out_of_range(&feature.name, position, size));
        }
        let mut position = position;
        if let Some(existing) = self.mapper.index_of(&key, &slot)? {
            if existing == position {
                return Ok(slot);
            }
            self.mapper.remove_at(&key.with_position(existing))?;
            if existing < position {
                position -= 1;
            }
        }
        self.tracker.attach(&self.mapper, &child, &key)?;
        let previous = self.mapper.set_at(&key.with_position(position), slot.clone())?;
        self.release_replaced(feature, &key, Some(&previous), Some(&slot))?;
        Ok(previous)
    }

    /// Inserts an element at `position`, shifting later ones up.
    ///
    /// Adding a child already held by the same containment feature moves
    /// it to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    pub fn add(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        position: u32,
        slot: Slot,
    ) -> CoreResult<()> {
        expect_many(feature)?;
        check_slot(feature, &slot)?;
        let _guard = self.containment_guard(feature);
        self.add_checked(feature, &Self::key(id, feature), position, slot)
            .map(|_| ())
    }

    /// Appends an element, returning its position.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] on a wrong feature or slot kind.
    pub fn append(&self, id: &Id, feature: &FeatureDescriptor, slot: Slot) -> CoreResult<u32> {
        expect_many(feature)?;
        check_slot(feature, &slot)?;
        let key = Self::key(id, feature);
        if contained(feature, &slot).is_none() {
            return self.mapper.append(&key, slot);
        }
        let _guard = self.containment.lock();
        let size = self.mapper.size_of(&key)?;
        self.add_checked(feature, &key, size, slot)
    }

    /// Inserts several elements starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    pub fn add_all(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        position: u32,
        slots: Vec<Slot>,
    ) -> CoreResult<()> {
        expect_many(feature)?;
        for slot in &slots {
            check_slot(feature, slot)?;
        }
        let key = Self::key(id, feature);
        if !feature.is_containment() {
            return self.mapper.insert_all_at(&key.with_position(position), slots);
        }
        let _guard = self.containment.lock();
        let mut at = position;
        for slot in slots {
            at = self.add_checked(feature, &key, at, slot)? + 1;
        }
        Ok(())
    }

    /// Appends several elements, returning the position of the first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] on a wrong feature or slot kind.
    pub fn append_all(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        slots: Vec<Slot>,
    ) -> CoreResult<u32> {
        expect_many(feature)?;
        for slot in &slots {
            check_slot(feature, slot)?;
        }
        let key = Self::key(id, feature);
        if !feature.is_containment() {
            return self.mapper.append_all(&key, slots);
        }
        let _guard = self.containment.lock();
        let mut first = None;
        for slot in slots {
            let size = self.mapper.size_of(&key)?;
            let at = self.add_checked(feature, &key, size, slot)?;
            first.get_or_insert(at);
        }
        match first {
            Some(at) => Ok(at),
            None => self.mapper.size_of(&key),
        }
    }

    /// Removes the element at `position`, shifting later ones down.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position >= size`.
    pub fn remove(&self, id: &Id, feature: &FeatureDescriptor, position: u32) -> CoreResult<Slot> {
        expect_many(feature)?;
        let key = Self::key(id, feature);
        let _guard = self.containment_guard(feature);
        let removed = self.mapper.remove_at(&key.with_position(position))?;
        self.release_replaced(feature, &key, Some(&removed), None)?;
        Ok(removed)
    }

    /// Moves an element within one feature, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if either position is
    /// outside `0..size`.
    pub fn move_within(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        from: u32,
        to: u32,
    ) -> CoreResult<Slot> {
        expect_many(feature)?;
        let key = Self::key(id, feature);
        let _guard = self.containment_guard(feature);
        self.mapper
            .move_slot(&key.with_position(from), &key.with_position(to))
    }

    /// Removes every element.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn clear(&self, id: &Id, feature: &FeatureDescriptor) -> CoreResult<()> {
        expect_many(feature)?;
        let key = Self::key(id, feature);
        if !feature.is_containment() {
            return self.mapper.clear(&key);
        }
        let _guard = self.containment.lock();
        let children = self.mapper.all_of(&key)?;
        self.mapper.clear(&key)?;
        for child in children.iter().filter_map(Slot::as_reference) {
            self.tracker.release(&self.mapper, &child, &key)?;
        }
        Ok(())
    }

    /// Returns the number of elements.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for single-valued features.
    pub fn size(&self, id: &Id, feature: &FeatureDescriptor) -> CoreResult<u32> {
        expect_many(feature)?;
        self.mapper.size_of(&Self::key(id, feature))
    }

    /// Returns `true` if the feature holds `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for single-valued features.
    pub fn contains(&self, id: &Id, feature: &FeatureDescriptor, slot: &Slot) -> CoreResult<bool> {
        expect_many(feature)?;
        self.mapper.contains(&Self::key(id, feature), slot)
    }

    /// Returns the first position of `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for single-valued features.
    pub fn index_of(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        slot: &Slot,
    ) -> CoreResult<Option<u32>> {
        expect_many(feature)?;
        self.mapper.index_of(&Self::key(id, feature), slot)
    }

    /// Returns the last position of `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for single-valued features.
    pub fn last_index_of(
        &self,
        id: &Id,
        feature: &FeatureDescriptor,
        slot: &Slot,
    ) -> CoreResult<Option<u32>> {
        expect_many(feature)?;
        self.mapper.last_index_of(&Self::key(id, feature), slot)
    }

    /// Returns every element in order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] for single-valued features.
    pub fn to_vec(&self, id: &Id, feature: &FeatureDescriptor) -> CoreResult<Vec<Slot>> {
        expect_many(feature)?;
        self.mapper.all_of(&Self::key(id, feature))
    }

    // === Lifecycle ===

    /// Persists pending changes.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn save(&self) -> CoreResult<()> {
        self.mapper.save()
    }

    /// Closes the mapper and forgets every reified handle.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn close(&self) -> CoreResult<()> {
        self.entities.clear();
        self.mapper.close()
    }

    fn key(id: &Id, feature: &FeatureDescriptor) -> SingleFeatureKey {
        SingleFeatureKey::new(*id, feature.name.clone())
    }

    fn containment_guard(&self, feature: &FeatureDescriptor) -> Option<MutexGuard<'_, ()>> {
        feature.is_containment().then(|| self.containment.lock())
    }

    /// Inserts a containment-checked element and returns where it landed.
    fn add_checked(
        &self,
        feature: &FeatureDescriptor,
        key: &SingleFeatureKey,
        position: u32,
        slot: Slot,
    ) -> CoreResult<u32> {
        let Some(child) = contained(feature, &slot) else {
            self.mapper.insert_at(&key.with_position(position), slot)?;
            return Ok(position);
        };

        let size = self.mapper.size_of(key)?;
        if position > size {
            return Err(CoreError::index_out_of_range(&feature.name, position, size));
        }
        let mut position = position;
        if let Some(existing) = self.mapper.index_of(key, &slot)? {
            self.mapper.remove_at(&key.with_position(existing))?;
            if existing < position {
                position -= 1;
            }
        }
        self.tracker.attach(&self.mapper, &child, key)?;
        self.mapper.insert_at(&key.with_position(position), slot)?;
        Ok(position)
    }

    fn release_replaced(
        &self,
        feature: &FeatureDescriptor,
        key: &SingleFeatureKey,
        previous: Option<&Slot>,
        current: Option<&Slot>,
    ) -> CoreResult<()> {
        if !feature.is_containment() {
            return Ok(());
        }
        let Some(old) = previous.and_then(Slot::as_reference) else {
            return Ok(());
        };
        if current.and_then(Slot::as_reference) == Some(old) {
            return Ok(());
        }
        self.tracker.release(&self.mapper, &old, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::kv_backend::KvBackend;
    use crate::meta::{ClassInfo, MetaModelRegistry};
    use modelstore_codec::Value;

    struct Fixture {
        store: ModelStore<KvBackend>,
        folder: ClassDescriptor,
        children: FeatureDescriptor,
        root: FeatureDescriptor,
        name: FeatureDescriptor,
        tags: FeatureDescriptor,
    }

    fn fixture() -> Fixture {
        let folder = ClassDescriptor::new("urn:fs", "Folder");
        let children = FeatureDescriptor::containment("children", Multiplicity::Many);
        let root = FeatureDescriptor::containment("root", Multiplicity::Single);
        let name = FeatureDescriptor::attribute("name", Multiplicity::Single);
        let tags = FeatureDescriptor::attribute("tags", Multiplicity::Many);
        let meta = MetaModelRegistry::new()
            .with(
                ClassInfo::new(folder.clone())
                    .feature(children.clone())
                    .feature(root.clone())
                    .feature(name.clone())
                    .feature(tags.clone()),
            )
            .with(ClassInfo::new(ClassDescriptor::new("urn:fs", "Node")).abstract_class(true));
        let backend = KvBackend::in_memory(BackendConfig::default()).unwrap();
        Fixture {
            store: ModelStore::new(backend, Arc::new(meta), StoreConfig::default()),
            folder,
            children,
            root,
            name,
            tags,
        }
    }

    fn folders(fx: &Fixture, n: usize) -> Vec<Id> {
        (0..n)
            .map(|_| {
                let id = Id::generate();
                fx.store.create(id, &fx.folder).unwrap();
                id
            })
            .collect()
    }

    fn refs(ids: &[Id]) -> Vec<Slot> {
        ids.iter().copied().map(Slot::Reference).collect()
    }

    #[test]
    fn reparenting_leaves_one_holder() {
        let fx = fixture();
        let ids = folders(&fx, 3);
        let (p1, p2, x) = (ids[0], ids[1], ids[2]);

        fx.store.add(&p1, &fx.children, 0, Slot::Reference(x)).unwrap();
        fx.store.add(&p2, &fx.children, 0, Slot::Reference(x)).unwrap();

        assert!(fx.store.to_vec(&p1, &fx.children).unwrap().is_empty());
        assert_eq!(fx.store.to_vec(&p2, &fx.children).unwrap(), refs(&[x]));
        assert_eq!(
            fx.store.container_of(&x).unwrap(),
            Some(ContainerEdge::new(p2, "children"))
        );
    }

    #[test]
    fn readding_to_same_feature_moves_child() {
        let fx = fixture();
        let ids = folders(&fx, 4);
        let (p, a, b, c) = (ids[0], ids[1], ids[2], ids[3]);
        fx.store.append_all(&p, &fx.children, refs(&[a, b, c])).unwrap();

        fx.store.add(&p, &fx.children, 0, Slot::Reference(c)).unwrap();
        assert_eq!(fx.store.to_vec(&p, &fx.children).unwrap(), refs(&[c, a, b]));

        assert_eq!(fx.store.append(&p, &fx.children, Slot::Reference(c)).unwrap(), 2);
        assert_eq!(fx.store.to_vec(&p, &fx.children).unwrap(), refs(&[a, b, c]));
    }

    #[test]
    fn set_at_existing_child_moves_it() {
        let fx = fixture();
        let ids = folders(&fx, 4);
        let (p, a, b, c) = (ids[0], ids[1], ids[2], ids[3]);
        fx.store.append_all(&p, &fx.children, refs(&[a, b, c])).unwrap();

        let replaced = fx.store.set_at(&p, &fx.children, 2, Slot::Reference(a)).unwrap();
        assert_eq!(replaced, Slot::Reference(c));
        assert_eq!(fx.store.to_vec(&p, &fx.children).unwrap(), refs(&[b, a]));
        assert_eq!(fx.store.container_of(&c).unwrap(), None);
        assert_eq!(
            fx.store.container_of(&a).unwrap(),
            Some(ContainerEdge::new(p, "children"))
        );
    }

    #[test]
    fn single_containment_moves_between_features() {
        let fx = fixture();
        let ids = folders(&fx, 3);
        let (p, x, y) = (ids[0], ids[1], ids[2]);

        fx.store.set(&p, &fx.root, Slot::Reference(x)).unwrap();
        fx.store.append(&p, &fx.children, Slot::Reference(x)).unwrap();
        assert_eq!(fx.store.get(&p, &fx.root).unwrap(), None);

        fx.store.set(&p, &fx.root, Slot::Reference(y)).unwrap();
        let previous = fx.store.set(&p, &fx.root, Slot::Reference(x)).unwrap();
        assert_eq!(previous, Some(Slot::Reference(y)));
        assert_eq!(fx.store.container_of(&y).unwrap(), None);
        assert!(fx.store.to_vec(&p, &fx.children).unwrap().is_empty());
        assert_eq!(
            fx.store.container_of(&x).unwrap(),
            Some(ContainerEdge::new(p, "root"))
        );
    }

    #[test]
    fn removing_and_clearing_release_children() {
        let fx = fixture();
        let ids = folders(&fx, 4);
        let (p, a, b, c) = (ids[0], ids[1], ids[2], ids[3]);
        fx.store.append_all(&p, &fx.children, refs(&[a, b, c])).unwrap();

        assert_eq!(fx.store.remove(&p, &fx.children, 1).unwrap(), Slot::Reference(b));
        assert_eq!(fx.store.container_of(&b).unwrap(), None);

        fx.store.unset(&p, &fx.children).unwrap();
        assert!(!fx.store.is_set(&p, &fx.children).unwrap());
        assert_eq!(fx.store.container_of(&a).unwrap(), None);
        assert_eq!(fx.store.container_of(&c).unwrap(), None);
    }

    #[test]
    fn attribute_features() {
        let fx = fixture();
        let p = folders(&fx, 1)[0];
        let text = |s: &str| Slot::Value(Value::from(s));

        assert!(!fx.store.is_set(&p, &fx.name).unwrap());
        fx.store.set(&p, &fx.name, text("docs")).unwrap();
        assert_eq!(fx.store.get(&p, &fx.name).unwrap(), Some(text("docs")));

        fx.store.append_all(&p, &fx.tags, vec![text("a"), text("b"), text("a")]).unwrap();
        assert_eq!(fx.store.index_of(&p, &fx.tags, &text("a")).unwrap(), Some(0));
        assert_eq!(fx.store.last_index_of(&p, &fx.tags, &text("a")).unwrap(), Some(2));
        assert!(fx.store.contains(&p, &fx.tags, &text("b")).unwrap());
        fx.store.move_within(&p, &fx.tags, 0, 2).unwrap();
        assert_eq!(
            fx.store.to_vec(&p, &fx.tags).unwrap(),
            vec![text("b"), text("a"), text("a")]
        );
    }

    #[test]
    fn wrong_kinds_are_rejected() {
        let fx = fixture();
        let ids = folders(&fx, 2);
        let (p, x) = (ids[0], ids[1]);

        let err = fx.store.set(&p, &fx.name, Slot::Reference(x)).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        let err = fx
            .store
            .append(&p, &fx.children, Slot::Value(Value::from(1)))
            .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert!(fx.store.get(&p, &fx.tags).is_err());
        assert!(fx.store.size(&p, &fx.name).is_err());
    }

    #[test]
    fn create_checks_the_metamodel() {
        let fx = fixture();
        let unknown = ClassDescriptor::new("urn:fs", "Missing");
        let node = ClassDescriptor::new("urn:fs", "Node");

        assert!(matches!(
            fx.store.create(Id::generate(), &unknown),
            Err(CoreError::UnknownClass { .. })
        ));
        assert!(matches!(
            fx.store.create(Id::generate(), &node),
            Err(CoreError::UnknownClass { reason: "abstract", .. })
        ));
    }

    #[test]
    fn resolve_uses_class_binding() {
        let fx = fixture();
        let id = folders(&fx, 1)[0];

        let entity = fx.store.resolve(&id).unwrap().unwrap();
        assert_eq!(entity.class, fx.folder);
        assert_eq!(fx.store.resolve(&Id::generate()).unwrap(), None);
        assert_eq!(
            fx.store.feature(&id, "children").unwrap(),
            Some(fx.children.clone())
        );
    }

    #[test]
    fn delete_removes_subtree() {
        let fx = fixture();
        let ids = folders(&fx, 4);
        let (top, mid, leaf, other) = (ids[0], ids[1], ids[2], ids[3]);
        fx.store.append(&top, &fx.children, Slot::Reference(mid)).unwrap();
        fx.store.set(&mid, &fx.root, Slot::Reference(leaf)).unwrap();
        fx.store.append(&other, &fx.children, Slot::Reference(top)).unwrap();

        assert_eq!(fx.store.delete(&top).unwrap(), 3);
        assert!(fx.store.to_vec(&other, &fx.children).unwrap().is_empty());
        for id in [top, mid, leaf] {
            assert_eq!(fx.store.resolve(&id).unwrap(), None);
        }
        assert_eq!(fx.store.mapper().entities().unwrap(), vec![other]);
    }

    #[test]
    fn concurrent_attach_keeps_one_holder() {
        use std::sync::Barrier;

        let fx = fixture();
        for _ in 0..25 {
            let parents = folders(&fx, 4);
            let child = folders(&fx, 1)[0];
            let barrier = Barrier::new(parents.len());

            std::thread::scope(|s| {
                for (i, parent) in parents.iter().enumerate() {
                    let (fx, barrier) = (&fx, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        if i == 0 {
                            fx.store.set(parent, &fx.root, Slot::Reference(child)).unwrap();
                        } else {
                            fx.store.append(parent, &fx.children, Slot::Reference(child)).unwrap();
                        }
                    });
                }
            });

            let mut holders = Vec::new();
            for parent in &parents {
                if fx.store.get(parent, &fx.root).unwrap() == Some(Slot::Reference(child)) {
                    holders.push(ContainerEdge::new(*parent, "root"));
                }
                for slot in fx.store.to_vec(parent, &fx.children).unwrap() {
                    assert_eq!(slot, Slot::Reference(child));
                    holders.push(ContainerEdge::new(*parent, "children"));
                }
            }
            assert_eq!(holders.len(), 1, "child held by {holders:?}");
            assert_eq!(fx.store.container_of(&child).unwrap().as_ref(), holders.first());
        }
    }
}
