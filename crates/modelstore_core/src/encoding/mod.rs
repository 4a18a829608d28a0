//! Physical layouts of ordered many-valued features.
//!
//! Every layout implements [`ManyEncoding`] with the same observable
//! contract:
//!
//! - positions are zero-based and contiguous, `size` = last position + 1
//! - `insert` at `p` requires `p <= size` and shifts elements `>= p` up
//! - `remove` at `p` requires `p < size` and shifts elements above down
//! - `move_within(from, to)` ends in the same order as removing `from`
//!   and inserting the element at `to`, with `to` read after the removal
//! - an empty feature leaves no record behind
//!
//! Mutating operations do not write; they read the current state and
//! return a [`WriteBatch`] that the backend applies atomically.

mod array;
mod indexed;
mod list;

use crate::config::EncodingKind;
use crate::error::{CoreError, CoreResult};
use crate::feature::{SingleFeatureKey, Slot};
use crate::id::Id;
use crate::keys;
use modelstore_codec::{from_cbor, to_cbor};
use modelstore_storage::{KeyValueStore, WriteBatch};
use std::fmt;

pub(crate) use array::ArrayEncoding;
pub(crate) use indexed::IndexedEncoding;
pub(crate) use list::ListEncoding;

/// Layout strategy for many-valued features over a key-value store.
pub(crate) trait ManyEncoding: Send + Sync + fmt::Debug {
    /// Returns which layout this is.
    fn kind(&self) -> EncodingKind;

    /// Tag of the record that exists iff a feature is non-empty.
    fn header_tag(&self) -> u8;

    /// Returns the size of a feature; 0 if never set.
    fn size(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<u32>;

    /// Returns the element at `position`.
    fn get(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey, position: u32)
        -> CoreResult<Slot>;

    /// Returns every element in order.
    fn all(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>>;

    /// Replaces the element at `position`, returning the previous one.
    fn set(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slot: Slot,
    ) -> CoreResult<(WriteBatch, Slot)>;

    /// Inserts `slots` starting at `position`.
    fn insert(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slots: Vec<Slot>,
    ) -> CoreResult<WriteBatch>;

    /// Removes the element at `position`, returning it.
    fn remove(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<(WriteBatch, Slot)>;

    /// Moves the element at `from` to `to` inside one feature.
    fn move_within(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        from: u32,
        to: u32,
    ) -> CoreResult<(WriteBatch, Slot)>;

    /// Removes every element of a feature.
    fn clear(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<WriteBatch>;

    /// Returns the names of the non-empty many-valued features of `owner`.
    fn features_of(&self, store: &dyn KeyValueStore, owner: &Id) -> CoreResult<Vec<String>> {
        store
            .scan_prefix(&keys::owner(self.header_tag(), owner))?
            .iter()
            .map(|(k, _)| keys::parse_feature(k, self.header_tag()).map(|(_, name)| name))
            .collect()
    }

    /// Returns every entity owning at least one non-empty many-valued feature.
    fn owners(&self, store: &dyn KeyValueStore) -> CoreResult<Vec<Id>> {
        let mut owners = store
            .scan_prefix(&keys::tag_prefix(self.header_tag()))?
            .iter()
            .map(|(k, _)| keys::parse_owner(k, self.header_tag()))
            .collect::<CoreResult<Vec<_>>>()?;
        owners.dedup();
        Ok(owners)
    }
}

/// Creates the strategy for `kind`.
pub(crate) fn strategy(kind: EncodingKind) -> Box<dyn ManyEncoding> {
    match kind {
        EncodingKind::Indexed => Box::new(IndexedEncoding),
        EncodingKind::Array => Box::new(ArrayEncoding),
        EncodingKind::List => Box::new(ListEncoding),
    }
}

pub(crate) fn check_index(key: &SingleFeatureKey, position: u32, size: u32) -> CoreResult<()> {
    if position < size {
        Ok(())
    } else {
        Err(CoreError::index_out_of_range(&key.name, position, size))
    }
}

pub(crate) fn check_insert(key: &SingleFeatureKey, position: u32, size: u32) -> CoreResult<()> {
    if position <= size {
        Ok(())
    } else {
        Err(CoreError::index_out_of_range(&key.name, position, size))
    }
}

/// Returns `size + added`, failing if the feature would outgrow `u32`.
pub(crate) fn grown_size(key: &SingleFeatureKey, size: u32, added: usize) -> CoreResult<u32> {
    u32::try_from(added)
        .ok()
        .and_then(|k| size.checked_add(k))
        .ok_or_else(|| CoreError::unsupported_operation(format!("feature '{}' is full", key.name)))
}

pub(crate) fn encode_slot(slot: &Slot) -> CoreResult<Vec<u8>> {
    Ok(to_cbor(slot)?)
}

pub(crate) fn decode_slot(bytes: &[u8]) -> CoreResult<Slot> {
    Ok(from_cbor(bytes)?)
}

/// Moves one element of `items` the same way [`ManyEncoding::move_within`] does.
pub(crate) fn move_in_vec<T>(items: &mut Vec<T>, from: usize, to: usize) {
    let item = items.remove(from);
    items.insert(to, item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_codec::Value;
    use modelstore_storage::MemoryStore;
    use proptest::prelude::*;

    fn text(s: &str) -> Slot {
        Slot::Value(Value::from(s))
    }

    fn texts(slots: &[Slot]) -> Vec<String> {
        slots
            .iter()
            .map(|s| s.as_value().and_then(Value::as_text).unwrap_or("?").to_string())
            .collect()
    }

    fn run<R>(
        store: &MemoryStore,
        result: CoreResult<(WriteBatch, R)>,
    ) -> R {
        let (batch, value) = result.unwrap();
        store.write_batch(batch).unwrap();
        value
    }

    fn insert(enc: &dyn ManyEncoding, store: &MemoryStore, key: &SingleFeatureKey, p: u32, s: &str) {
        let batch = enc.insert(store, key, p, vec![text(s)]).unwrap();
        store.write_batch(batch).unwrap();
    }

    fn each_encoding(f: impl Fn(&dyn ManyEncoding)) {
        for kind in EncodingKind::ALL {
            let enc = strategy(kind);
            assert_eq!(enc.kind(), kind);
            f(enc.as_ref());
        }
    }

    fn feature() -> SingleFeatureKey {
        SingleFeatureKey::new(Id::from_literal("owner"), "items")
    }

    #[test]
    fn insert_at_front_shifts() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            insert(enc, &store, &key, 0, "a");
            insert(enc, &store, &key, 0, "b");
            assert_eq!(enc.size(&store, &key).unwrap(), 2);
            assert_eq!(texts(&enc.all(&store, &key).unwrap()), ["b", "a"]);
            assert_eq!(enc.get(&store, &key, 1).unwrap(), text("a"));
        });
    }

    #[test]
    fn remove_in_middle() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            for (i, s) in ["a", "b", "c"].iter().enumerate() {
                insert(enc, &store, &key, i as u32, s);
            }
            let removed = run(&store, enc.remove(&store, &key, 1));
            assert_eq!(removed, text("b"));
            assert_eq!(texts(&enc.all(&store, &key).unwrap()), ["a", "c"]);
            assert_eq!(enc.size(&store, &key).unwrap(), 2);
        });
    }

    #[test]
    fn move_forward_and_back() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            for (i, s) in ["a", "b", "c", "d"].iter().enumerate() {
                insert(enc, &store, &key, i as u32, s);
            }
            let moved = run(&store, enc.move_within(&store, &key, 1, 3));
            assert_eq!(moved, text("b"));
            assert_eq!(texts(&enc.all(&store, &key).unwrap()), ["a", "c", "d", "b"]);

            run(&store, enc.move_within(&store, &key, 3, 0));
            assert_eq!(texts(&enc.all(&store, &key).unwrap()), ["b", "a", "c", "d"]);
        });
    }

    #[test]
    fn out_of_range_positions_fail() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            insert(enc, &store, &key, 0, "a");
            assert!(matches!(
                enc.get(&store, &key, 1),
                Err(CoreError::IndexOutOfRange { position: 1, size: 1, .. })
            ));
            assert!(enc.insert(&store, &key, 2, vec![text("x")]).is_err());
            assert!(enc.remove(&store, &key, 1).is_err());
            assert!(enc.set(&store, &key, 1, text("x")).is_err());
            assert!(enc.move_within(&store, &key, 0, 1).is_err());
        });
    }

    #[test]
    fn clear_leaves_no_records() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            insert(enc, &store, &key, 0, "a");
            insert(enc, &store, &key, 1, "b");
            store.write_batch(enc.clear(&store, &key).unwrap()).unwrap();
            assert_eq!(enc.size(&store, &key).unwrap(), 0);
            assert!(store.is_empty().unwrap());
        });
    }

    #[test]
    fn removing_last_element_leaves_no_records() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            insert(enc, &store, &key, 0, "a");
            run(&store, enc.remove(&store, &key, 0));
            assert!(store.is_empty().unwrap());
        });
    }

    #[test]
    fn set_replaces() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            insert(enc, &store, &key, 0, "a");
            insert(enc, &store, &key, 1, "b");
            let old = run(&store, enc.set(&store, &key, 1, text("z")));
            assert_eq!(old, text("b"));
            assert_eq!(texts(&enc.all(&store, &key).unwrap()), ["a", "z"]);
        });
    }

    #[test]
    fn insert_many_in_middle() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            insert(enc, &store, &key, 0, "a");
            insert(enc, &store, &key, 1, "d");
            let batch = enc
                .insert(&store, &key, 1, vec![text("b"), text("c")])
                .unwrap();
            store.write_batch(batch).unwrap();
            assert_eq!(texts(&enc.all(&store, &key).unwrap()), ["a", "b", "c", "d"]);
            assert_eq!(enc.get(&store, &key, 2).unwrap(), text("c"));
        });
    }

    #[test]
    fn features_and_owners_are_enumerated() {
        each_encoding(|enc| {
            let store = MemoryStore::new();
            let key = feature();
            let other = SingleFeatureKey::new(key.owner, "others");
            insert(enc, &store, &key, 0, "a");
            insert(enc, &store, &other, 0, "b");
            insert(enc, &store, &other, 1, "c");
            let mut names = enc.features_of(&store, &key.owner).unwrap();
            names.sort();
            assert_eq!(names, ["items", "others"]);
            assert_eq!(enc.owners(&store).unwrap(), vec![key.owner]);
        });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u32, i64),
        Remove(u32),
        Move(u32, u32),
        Set(u32, i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (any::<u32>(), any::<i64>()).prop_map(|(p, v)| Op::Insert(p, v)),
            1 => any::<u32>().prop_map(Op::Remove),
            1 => (any::<u32>(), any::<u32>()).prop_map(|(a, b)| Op::Move(a, b)),
            1 => (any::<u32>(), any::<i64>()).prop_map(|(p, v)| Op::Set(p, v)),
        ]
    }

    proptest! {
        #[test]
        fn encodings_match_vec(ops in proptest::collection::vec(op(), 0..40)) {
            for kind in EncodingKind::ALL {
                let enc = strategy(kind);
                let store = MemoryStore::new();
                let key = feature();
                let mut oracle: Vec<Slot> = Vec::new();
                for op in &ops {
                    let n = oracle.len() as u32;
                    match *op {
                        Op::Insert(p, v) => {
                            let p = p % (n + 1);
                            let slot = Slot::Value(Value::Integer(v));
                            store.write_batch(enc.insert(&store, &key, p, vec![slot.clone()]).unwrap()).unwrap();
                            oracle.insert(p as usize, slot);
                        }
                        Op::Remove(p) if n > 0 => {
                            let p = p % n;
                            let (batch, removed) = enc.remove(&store, &key, p).unwrap();
                            store.write_batch(batch).unwrap();
                            prop_assert_eq!(removed, oracle.remove(p as usize));
                        }
                        Op::Move(a, b) if n > 0 => {
                            let (a, b) = (a % n, b % n);
                            let (batch, _) = enc.move_within(&store, &key, a, b).unwrap();
                            store.write_batch(batch).unwrap();
                            move_in_vec(&mut oracle, a as usize, b as usize);
                        }
                        Op::Set(p, v) if n > 0 => {
                            let p = p % n;
                            let slot = Slot::Value(Value::Integer(v));
                            let (batch, _) = enc.set(&store, &key, p, slot.clone()).unwrap();
                            store.write_batch(batch).unwrap();
                            oracle[p as usize] = slot;
                        }
                        _ => {}
                    }
                    prop_assert_eq!(enc.size(&store, &key).unwrap(), oracle.len() as u32);
                }
                prop_assert_eq!(enc.all(&store, &key).unwrap(), oracle.clone());
                for (i, slot) in oracle.iter().enumerate() {
                    prop_assert_eq!(&enc.get(&store, &key, i as u32).unwrap(), slot);
                }
            }
        }
    }
}
