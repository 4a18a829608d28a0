//! Array layout: the whole feature packed into one blob.

use super::{check_index, check_insert, grown_size, ManyEncoding};
use crate::config::EncodingKind;
use crate::error::CoreResult;
use crate::feature::{SingleFeatureKey, Slot};
use crate::keys;
use modelstore_codec::{from_cbor, to_cbor};
use modelstore_storage::{KeyValueStore, WriteBatch};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ArrayEncoding;

impl ArrayEncoding {
    fn blob_key(key: &SingleFeatureKey) -> Vec<u8> {
        keys::feature(keys::ARRAY, &key.owner, &key.name)
    }

    fn load(store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        match store.get(&Self::blob_key(key))? {
            Some(bytes) => Ok(from_cbor(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn store_batch(key: &SingleFeatureKey, slots: &[Slot]) -> CoreResult<WriteBatch> {
        let mut batch = WriteBatch::with_capacity(1);
        if slots.is_empty() {
            batch.delete(Self::blob_key(key));
        } else {
            batch.put(Self::blob_key(key), to_cbor(slots)?);
        }
        Ok(batch)
    }

    fn len(slots: &[Slot]) -> u32 {
        // Inserts refuse to grow a feature past u32::MAX
        #[allow(clippy::cast_possible_truncation)]
        let len = slots.len() as u32;
        len
    }
}

impl ManyEncoding for ArrayEncoding {
    fn kind(&self) -> EncodingKind {
        EncodingKind::Array
    }

    fn header_tag(&self) -> u8 {
        keys::ARRAY
    }

    fn size(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<u32> {
        Ok(Self::len(&Self::load(store, key)?))
    }

    fn get(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<Slot> {
        let mut slots = Self::load(store, key)?;
        check_index(key, position, Self::len(&slots))?;
        Ok(slots.swap_remove(position as usize))
    }

    fn all(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        Self::load(store, key)
    }

    fn set(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slot: Slot,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let mut slots = Self::load(store, key)?;
        check_index(key, position, Self::len(&slots))?;
        let previous = std::mem::replace(&mut slots[position as usize], slot);
        Ok((Self::store_batch(key, &slots)?, previous))
    }

    fn insert(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        new_slots: Vec<Slot>,
    ) -> CoreResult<WriteBatch> {
        let mut slots = Self::load(store, key)?;
        check_insert(key, position, Self::len(&slots))?;
        if new_slots.is_empty() {
            return Ok(WriteBatch::new());
        }
        grown_size(key, Self::len(&slots), new_slots.len())?;
        let at = position as usize;
        slots.splice(at..at, new_slots);
        Self::store_batch(key, &slots)
    }

    fn remove(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let mut slots = Self::load(store, key)?;
        check_index(key, position, Self::len(&slots))?;
        let removed = slots.remove(position as usize);
        Ok((Self::store_batch(key, &slots)?, removed))
    }

    fn move_within(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        from: u32,
        to: u32,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let mut slots = Self::load(store, key)?;
        let size = Self::len(&slots);
        check_index(key, from, size)?;
        check_index(key, to, size)?;
        if from == to {
            return Ok((WriteBatch::new(), slots.swap_remove(from as usize)));
        }
        super::move_in_vec(&mut slots, from as usize, to as usize);
        let moved = slots[to as usize].clone();
        Ok((Self::store_batch(key, &slots)?, moved))
    }

    fn clear(&self, _store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<WriteBatch> {
        Self::store_batch(key, &[])
    }
}

