//! The per-entity feature storage contract.

use crate::class::ClassDescriptor;
use crate::copy::{copy_all, CopyReport};
use crate::error::{CoreError, CoreResult};
use crate::feature::{ContainerEdge, ManyFeatureKey, SingleFeatureKey, Slot, StoredFeature};
use crate::id::Id;
use crate::meta::MetaModel;
use modelstore_codec::Value;
use std::collections::BTreeSet;

/// Maps structural operations on entity features onto a physical store.
///
/// Every backend (and every decorator around one) implements the
/// required slot-level operations; the typed attribute and reference
/// families are provided on top of them.
///
/// # Semantics
///
/// - Reading a feature that was never written is not an error: single
///   features read as `None`, many features as empty.
/// - Positions are zero-based; out-of-range positions fail with
///   [`CoreError::IndexOutOfRange`] and change nothing.
/// - Feature writes never create class bindings.
/// - Class bindings are write-once.
/// - Within one `(owner, feature)` every shift is a critical section;
///   different features proceed in parallel.
///
/// All methods take `&self`; implementations use interior mutability and
/// are shared across threads.
pub trait DataMapper: Send + Sync {
    /// Returns a short name for diagnostics.
    fn name(&self) -> &str;

    // === Single-valued features ===

    /// Reads a single-valued feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn get_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>>;

    /// Writes a single-valued feature, returning the previous element.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn set_single(&self, key: &SingleFeatureKey, slot: Slot) -> CoreResult<Option<Slot>>;

    /// Unsets a single-valued feature, returning the previous element.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn unset_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>>;

    // === Many-valued features ===

    /// Reads the element at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position >= size`.
    fn get_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot>;

    /// Replaces the element at `key.position`, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position >= size`.
    fn set_at(&self, key: &ManyFeatureKey, slot: Slot) -> CoreResult<Slot>;

    /// Inserts `slots` starting at `key.position`, shifting later elements up.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    fn insert_all_at(&self, key: &ManyFeatureKey, slots: Vec<Slot>) -> CoreResult<()>;

    /// Appends `slots` in one critical section, returning the position of
    /// the first one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn append_all(&self, key: &SingleFeatureKey, slots: Vec<Slot>) -> CoreResult<u32>;

    /// Removes and returns the element at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position >= size`.
    fn remove_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot>;

    /// Moves the element at `source` to `target`, returning it.
    ///
    /// `target.position` is read after the element has been removed from
    /// `source`. Source and target may name different features.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] for a bad position, or
    /// [`CoreError::UnsupportedOperation`] where a layer cannot move
    /// across features.
    fn move_slot(&self, source: &ManyFeatureKey, target: &ManyFeatureKey) -> CoreResult<Slot>;

    /// Removes every element of a many-valued feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn clear(&self, key: &SingleFeatureKey) -> CoreResult<()>;

    /// Returns the size of a many-valued feature; 0 if never set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn size_of(&self, key: &SingleFeatureKey) -> CoreResult<u32>;

    /// Returns every element of a many-valued feature in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn all_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>>;

    // === Containment ===

    /// Returns the container edge of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn container_of(&self, id: &Id) -> CoreResult<Option<ContainerEdge>>;

    /// Records the container edge of `id`, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn container_for(&self, id: &Id, edge: ContainerEdge) -> CoreResult<Option<ContainerEdge>>;

    /// Removes the container edge of `id`, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn remove_container(&self, id: &Id) -> CoreResult<Option<ContainerEdge>>;

    // === Classes ===

    /// Returns the class bound to `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn class_of(&self, id: &Id) -> CoreResult<Option<ClassDescriptor>>;

    /// Binds `id` to `class`. Binding the same class again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ClassAlreadyExists`] if `id` is bound to a
    /// different class.
    fn class_for(&self, id: &Id, class: &ClassDescriptor) -> CoreResult<()>;

    /// Returns every entity bound exactly to one of `classes`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedLookup`] unless the mapper has an
    /// instance index or opted into scanning.
    fn all_instances_of_any(&self, classes: &BTreeSet<ClassDescriptor>) -> CoreResult<Vec<Id>> {
        let _ = classes;
        Err(CoreError::unsupported_lookup(
            self.name(),
            "this mapper does not support the lookup of all instances",
        ))
    }

    // === Enumeration and lifecycle ===

    /// Returns every entity with any stored data, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn entities(&self) -> CoreResult<Vec<Id>>;

    /// Returns the non-empty features stored for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn features_of(&self, id: &Id) -> CoreResult<Vec<StoredFeature>>;

    /// Deletes everything stored for `id`: features, class binding and
    /// container edge. References held by other entities are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn remove(&self, id: &Id) -> CoreResult<()>;

    /// Copies every entity of this mapper into `target`.
    ///
    /// The default goes through the generic per-feature API; backends
    /// override it with a physical fast path when `target` allows it.
    ///
    /// # Errors
    ///
    /// Returns the first error of either side. A failed copy may be
    /// restarted from scratch.
    fn copy_to(&self, target: &dyn DataMapper) -> CoreResult<CopyReport> {
        copy_all(self, target)
    }

    /// Makes every change durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn save(&self) -> CoreResult<()>;

    /// Saves, then releases the backend. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the final save fails.
    fn close(&self) -> CoreResult<()>;

    /// Returns `true` once closed.
    fn is_closed(&self) -> bool;

    /// Returns `self` as [`std::any::Any`] for physical fast paths.
    fn as_any(&self) -> &dyn std::any::Any;

    // === Provided operations ===

    /// Returns `true` if a single feature holds a value or a many feature
    /// holds at least one element.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn has(&self, key: &SingleFeatureKey) -> CoreResult<bool> {
        Ok(self.get_single(key)?.is_some() || self.size_of(key)? > 0)
    }

    /// Inserts one element at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    fn insert_at(&self, key: &ManyFeatureKey, slot: Slot) -> CoreResult<()> {
        self.insert_all_at(key, vec![slot])
    }

    /// Appends one element, returning its position.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn append(&self, key: &SingleFeatureKey, slot: Slot) -> CoreResult<u32> {
        self.append_all(key, vec![slot])
    }

    /// Returns `true` if a many feature holds `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn contains(&self, key: &SingleFeatureKey, slot: &Slot) -> CoreResult<bool> {
        Ok(self.index_of(key, slot)?.is_some())
    }

    /// Returns the first position of `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn index_of(&self, key: &SingleFeatureKey, slot: &Slot) -> CoreResult<Option<u32>> {
        Ok(position(self.all_of(key)?.iter().position(|s| s == slot)))
    }

    /// Returns the last position of `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn last_index_of(&self, key: &SingleFeatureKey, slot: &Slot) -> CoreResult<Option<u32>> {
        Ok(position(self.all_of(key)?.iter().rposition(|s| s == slot)))
    }

    // === Attribute and reference families ===

    /// Reads a single-valued attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if the feature holds a reference.
    fn value_of(&self, key: &SingleFeatureKey) -> CoreResult<Option<Value>> {
        self.get_single(key)?
            .map(|s| expect_value(&key.name, s))
            .transpose()
    }

    /// Writes a single-valued attribute, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if the feature held a reference.
    fn value_for(&self, key: &SingleFeatureKey, value: Value) -> CoreResult<Option<Value>> {
        self.set_single(key, Slot::Value(value))?
            .map(|s| expect_value(&key.name, s))
            .transpose()
    }

    /// Reads a single-valued reference.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if the feature holds a value.
    fn reference_of(&self, key: &SingleFeatureKey) -> CoreResult<Option<Id>> {
        self.get_single(key)?
            .map(|s| expect_reference(&key.name, s))
            .transpose()
    }

    /// Writes a single-valued reference, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if the feature held a value.
    fn reference_for(&self, key: &SingleFeatureKey, reference: Id) -> CoreResult<Option<Id>> {
        self.set_single(key, Slot::Reference(reference))?
            .map(|s| expect_reference(&key.name, s))
            .transpose()
    }

    /// Reads one element of a many-valued attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] or [`CoreError::TypeMismatch`].
    fn value_at(&self, key: &ManyFeatureKey) -> CoreResult<Value> {
        expect_value(&key.name, self.get_at(key)?)
    }

    /// Reads one element of a many-valued reference.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] or [`CoreError::TypeMismatch`].
    fn reference_at(&self, key: &ManyFeatureKey) -> CoreResult<Id> {
        expect_reference(&key.name, self.get_at(key)?)
    }

    /// Replaces one element of a many-valued attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] or [`CoreError::TypeMismatch`].
    fn value_at_for(&self, key: &ManyFeatureKey, value: Value) -> CoreResult<Value> {
        expect_value(&key.name, self.set_at(key, Slot::Value(value))?)
    }

    /// Replaces one element of a many-valued reference.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] or [`CoreError::TypeMismatch`].
    fn reference_at_for(&self, key: &ManyFeatureKey, reference: Id) -> CoreResult<Id> {
        expect_reference(&key.name, self.set_at(key, Slot::Reference(reference))?)
    }

    /// Inserts an attribute value at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    fn add_value(&self, key: &ManyFeatureKey, value: Value) -> CoreResult<()> {
        self.insert_at(key, Slot::Value(value))
    }

    /// Inserts a reference at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    fn add_reference(&self, key: &ManyFeatureKey, reference: Id) -> CoreResult<()> {
        self.insert_at(key, Slot::Reference(reference))
    }

    /// Inserts attribute values starting at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    fn add_all_values(&self, key: &ManyFeatureKey, values: Vec<Value>) -> CoreResult<()> {
        self.insert_all_at(key, values.into_iter().map(Slot::Value).collect())
    }

    /// Inserts references starting at `key.position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `position > size`.
    fn add_all_references(&self, key: &ManyFeatureKey, references: Vec<Id>) -> CoreResult<()> {
        self.insert_all_at(key, references.into_iter().map(Slot::Reference).collect())
    }

    /// Appends an attribute value, returning its position.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn append_value(&self, key: &SingleFeatureKey, value: Value) -> CoreResult<u32> {
        self.append(key, Slot::Value(value))
    }

    /// Appends a reference, returning its position.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn append_reference(&self, key: &SingleFeatureKey, reference: Id) -> CoreResult<u32> {
        self.append(key, Slot::Reference(reference))
    }

    /// Appends attribute values, returning the position of the first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn append_all_values(&self, key: &SingleFeatureKey, values: Vec<Value>) -> CoreResult<u32> {
        self.append_all(key, values.into_iter().map(Slot::Value).collect())
    }

    /// Appends references, returning the position of the first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn append_all_references(&self, key: &SingleFeatureKey, references: Vec<Id>) -> CoreResult<u32> {
        self.append_all(key, references.into_iter().map(Slot::Reference).collect())
    }

    /// Removes and returns one attribute value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] or [`CoreError::TypeMismatch`].
    fn remove_value(&self, key: &ManyFeatureKey) -> CoreResult<Value> {
        expect_value(&key.name, self.remove_at(key)?)
    }

    /// Removes and returns one reference.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] or [`CoreError::TypeMismatch`].
    fn remove_reference(&self, key: &ManyFeatureKey) -> CoreResult<Id> {
        expect_reference(&key.name, self.remove_at(key)?)
    }

    /// Returns every value of a many-valued attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if an element is a reference.
    fn all_values_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Value>> {
        self.all_of(key)?
            .into_iter()
            .map(|s| expect_value(&key.name, s))
            .collect()
    }

    /// Returns every reference of a many-valued reference.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] if an element is a value.
    fn all_references_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Id>> {
        self.all_of(key)?
            .into_iter()
            .map(|s| expect_reference(&key.name, s))
            .collect()
    }

    /// Returns the first position of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn index_of_value(&self, key: &SingleFeatureKey, value: &Value) -> CoreResult<Option<u32>> {
        self.index_of(key, &Slot::Value(value.clone()))
    }

    /// Returns the first position of `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn index_of_reference(&self, key: &SingleFeatureKey, reference: Id) -> CoreResult<Option<u32>> {
        self.index_of(key, &Slot::Reference(reference))
    }

    /// Returns the last position of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn last_index_of_value(&self, key: &SingleFeatureKey, value: &Value) -> CoreResult<Option<u32>> {
        self.last_index_of(key, &Slot::Value(value.clone()))
    }

    /// Returns the last position of `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn last_index_of_reference(
        &self,
        key: &SingleFeatureKey,
        reference: Id,
    ) -> CoreResult<Option<u32>> {
        self.last_index_of(key, &Slot::Reference(reference))
    }

    /// Returns `true` if a many-valued attribute holds `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn contains_value(&self, key: &SingleFeatureKey, value: &Value) -> CoreResult<bool> {
        self.contains(key, &Slot::Value(value.clone()))
    }

    /// Returns `true` if a many-valued reference holds `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or is closed.
    fn contains_reference(&self, key: &SingleFeatureKey, reference: Id) -> CoreResult<bool> {
        self.contains(key, &Slot::Reference(reference))
    }

    /// Returns the instances of `class`.
    ///
    /// With `strict`, only entities bound exactly to `class`; otherwise
    /// entities bound to `class` or any of its transitive subtypes. A
    /// strict lookup of an abstract class is always empty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedLookup`] if the mapper cannot
    /// answer instance lookups.
    fn all_instances_of(
        &self,
        meta: &dyn MetaModel,
        class: &ClassDescriptor,
        strict: bool,
    ) -> CoreResult<Vec<Id>> {
        if strict && meta.is_abstract(class) {
            return Ok(Vec::new());
        }
        let mut classes = if strict {
            BTreeSet::new()
        } else {
            meta.subtypes(class)
        };
        classes.insert(class.clone());
        self.all_instances_of_any(&classes)
    }
}

/// Boxed mappers, including `Box<dyn DataMapper>`, are mappers too.
impl<T: DataMapper + ?Sized> DataMapper for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        (**self).get_single(key)
    }

    fn set_single(&self, key: &SingleFeatureKey, slot: Slot) -> CoreResult<Option<Slot>> {
        (**self).set_single(key, slot)
    }

    fn unset_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        (**self).unset_single(key)
    }

    fn get_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        (**self).get_at(key)
    }

    fn set_at(&self, key: &ManyFeatureKey, slot: Slot) -> CoreResult<Slot> {
        (**self).set_at(key, slot)
    }

    fn insert_all_at(&self, key: &ManyFeatureKey, slots: Vec<Slot>) -> CoreResult<()> {
        (**self).insert_all_at(key, slots)
    }

    fn append_all(&self, key: &SingleFeatureKey, slots: Vec<Slot>) -> CoreResult<u32> {
        (**self).append_all(key, slots)
    }

    fn remove_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        (**self).remove_at(key)
    }

    fn move_slot(&self, source: &ManyFeatureKey, target: &ManyFeatureKey) -> CoreResult<Slot> {
        (**self).move_slot(source, target)
    }

    fn clear(&self, key: &SingleFeatureKey) -> CoreResult<()> {
        (**self).clear(key)
    }

    fn size_of(&self, key: &SingleFeatureKey) -> CoreResult<u32> {
        (**self).size_of(key)
    }

    fn all_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        (**self).all_of(key)
    }

    fn container_of(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        (**self).container_of(id)
    }

    fn container_for(&self, id: &Id, edge: ContainerEdge) -> CoreResult<Option<ContainerEdge>> {
        (**self).container_for(id, edge)
    }

    fn remove_container(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        (**self).remove_container(id)
    }

    fn class_of(&self, id: &Id) -> CoreResult<Option<ClassDescriptor>> {
        (**self).class_of(id)
    }

    fn class_for(&self, id: &Id, class: &ClassDescriptor) -> CoreResult<()> {
        (**self).class_for(id, class)
    }

    fn all_instances_of_any(&self, classes: &BTreeSet<ClassDescriptor>) -> CoreResult<Vec<Id>> {
        (**self).all_instances_of_any(classes)
    }

    fn entities(&self) -> CoreResult<Vec<Id>> {
        (**self).entities()
    }

    fn features_of(&self, id: &Id) -> CoreResult<Vec<StoredFeature>> {
        (**self).features_of(id)
    }

    fn remove(&self, id: &Id) -> CoreResult<()> {
        (**self).remove(id)
    }

    fn copy_to(&self, target: &dyn DataMapper) -> CoreResult<CopyReport> {
        (**self).copy_to(target)
    }

    fn save(&self) -> CoreResult<()> {
        (**self).save()
    }

    fn close(&self) -> CoreResult<()> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        (**self).as_any()
    }
}

fn position(index: Option<usize>) -> Option<u32> {
    index.and_then(|i| u32::try_from(i).ok())
}

pub(crate) fn expect_value(feature: &str, slot: Slot) -> CoreResult<Value> {
    match slot {
        Slot::Value(v) => Ok(v),
        Slot::Reference(_) => Err(CoreError::type_mismatch(feature, "attribute value")),
    }
}

pub(crate) fn expect_reference(feature: &str, slot: Slot) -> CoreResult<Id> {
    match slot {
        Slot::Reference(id) => Ok(id),
        Slot::Value(_) => Err(CoreError::type_mismatch(feature, "reference")),
    }
}
