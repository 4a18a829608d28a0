//! Indexed layout: one record per position plus a size record.

use super::{check_index, check_insert, decode_slot, encode_slot, grown_size, ManyEncoding};
use crate::config::EncodingKind;
use crate::error::{CoreError, CoreResult};
use crate::feature::{SingleFeatureKey, Slot};
use crate::keys;
use modelstore_codec::{from_cbor, to_cbor};
use modelstore_storage::{KeyValueStore, WriteBatch};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IndexedEncoding;

impl IndexedEncoding {
    fn size_key(key: &SingleFeatureKey) -> Vec<u8> {
        keys::feature(keys::INDEXED_SIZE, &key.owner, &key.name)
    }

    fn element_key(key: &SingleFeatureKey, position: u32) -> Vec<u8> {
        keys::indexed_element(&key.owner, &key.name, position)
    }

    fn read_element(
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<Slot> {
        let bytes = store
            .get(&Self::element_key(key, position))?
            .ok_or_else(|| {
                CoreError::invalid_format(format!("missing element {position} of '{}'", key.name))
            })?;
        decode_slot(&bytes)
    }

    /// Reads the elements in `[from, to)`.
    fn read_range(
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        from: u32,
        to: u32,
    ) -> CoreResult<Vec<Slot>> {
        (from..to).map(|p| Self::read_element(store, key, p)).collect()
    }

    fn write_size(batch: &mut WriteBatch, key: &SingleFeatureKey, size: u32) -> CoreResult<()> {
        if size == 0 {
            batch.delete(Self::size_key(key));
        } else {
            batch.put(Self::size_key(key), to_cbor(&size)?);
        }
        Ok(())
    }
}

impl ManyEncoding for IndexedEncoding {
    fn kind(&self) -> EncodingKind {
        EncodingKind::Indexed
    }

    fn header_tag(&self) -> u8 {
        keys::INDEXED_SIZE
    }

    fn size(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<u32> {
        match store.get(&Self::size_key(key))? {
            Some(bytes) => Ok(from_cbor(&bytes)?),
            None => Ok(0),
        }
    }

    fn get(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<Slot> {
        match store.get(&Self::element_key(key, position))? {
            Some(bytes) => decode_slot(&bytes),
            None => Err(CoreError::index_out_of_range(
                &key.name,
                position,
                self.size(store, key)?,
            )),
        }
    }

    fn all(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        let prefix = keys::feature(keys::INDEXED_ELEMENT, &key.owner, &key.name);
        store
            .scan_prefix(&prefix)?
            .iter()
            .map(|(_, v)| decode_slot(v))
            .collect()
    }

    fn set(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slot: Slot,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let previous = self.get(store, key, position)?;
        let mut batch = WriteBatch::with_capacity(1);
        batch.put(Self::element_key(key, position), encode_slot(&slot)?);
        Ok((batch, previous))
    }

    fn insert(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slots: Vec<Slot>,
    ) -> CoreResult<WriteBatch> {
        let size = self.size(store, key)?;
        check_insert(key, position, size)?;
        if slots.is_empty() {
            return Ok(WriteBatch::new());
        }
        let new_size = grown_size(key, size, slots.len())?;
        let added = new_size - size;

        let shifted = Self::read_range(store, key, position, size)?;
        let mut batch = WriteBatch::with_capacity(shifted.len() + slots.len() + 1);
        for (p, slot) in (position + added..).zip(&shifted) {
            batch.put(Self::element_key(key, p), encode_slot(slot)?);
        }
        for (p, slot) in (position..).zip(&slots) {
            batch.put(Self::element_key(key, p), encode_slot(slot)?);
        }
        Self::write_size(&mut batch, key, new_size)?;
        Ok(batch)
    }

    fn remove(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let size = self.size(store, key)?;
        check_index(key, position, size)?;

        let mut tail = Self::read_range(store, key, position, size)?.into_iter();
        let removed = tail.next().ok_or_else(|| {
            CoreError::invalid_format(format!("missing element {position} of '{}'", key.name))
        })?;
        let mut batch = WriteBatch::new();
        for (p, slot) in (position..).zip(tail) {
            batch.put(Self::element_key(key, p), encode_slot(&slot)?);
        }
        batch.delete(Self::element_key(key, size - 1));
        Self::write_size(&mut batch, key, size - 1)?;
        Ok((batch, removed))
    }

    fn move_within(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        from: u32,
        to: u32,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let size = self.size(store, key)?;
        check_index(key, from, size)?;
        check_index(key, to, size)?;

        let low = from.min(to);
        let high = from.max(to);
        let mut window = Self::read_range(store, key, low, high + 1)?;
        super::move_in_vec(&mut window, (from - low) as usize, (to - low) as usize);
        let moved = window[(to - low) as usize].clone();

        let mut batch = WriteBatch::with_capacity(window.len());
        if from != to {
            for (p, slot) in (low..).zip(&window) {
                batch.put(Self::element_key(key, p), encode_slot(slot)?);
            }
        }
        Ok((batch, moved))
    }

    fn clear(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<WriteBatch> {
        let prefix = keys::feature(keys::INDEXED_ELEMENT, &key.owner, &key.name);
        let mut batch = WriteBatch::new();
        for (k, _) in store.scan_prefix(&prefix)? {
            batch.delete(k);
        }
        batch.delete(Self::size_key(key));
        Ok(batch)
    }
}
