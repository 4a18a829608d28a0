//! List layout: a persistent doubly linked list.
//!
//! A header record holds the end pointers and the size; each element is a
//! node record linked to its neighbours by node id. Node ids are never
//! positions, so insertions and removals only touch the neighbours.

use super::{check_index, check_insert, grown_size, ManyEncoding};
use crate::config::EncodingKind;
use crate::error::{CoreError, CoreResult};
use crate::feature::{SingleFeatureKey, Slot};
use crate::keys;
use modelstore_codec::{from_cbor, to_cbor};
use modelstore_storage::{KeyValueStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ListEncoding;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ListHeader {
    head: Option<u64>,
    tail: Option<u64>,
    size: u32,
    next_node: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListNode {
    slot: Slot,
    prev: Option<u64>,
    next: Option<u64>,
}

/// Pending edits of one list, read through to the store.
struct ListEdit<'a> {
    store: &'a dyn KeyValueStore,
    key: &'a SingleFeatureKey,
    header: ListHeader,
    // None marks a deleted node
    nodes: BTreeMap<u64, Option<ListNode>>,
    dirty: Vec<u64>,
}

impl<'a> ListEdit<'a> {
    fn load(store: &'a dyn KeyValueStore, key: &'a SingleFeatureKey) -> CoreResult<Self> {
        let header = match store.get(&ListEncoding::header_key(key))? {
            Some(bytes) => from_cbor(&bytes)?,
            None => ListHeader::default(),
        };
        Ok(Self {
            store,
            key,
            header,
            nodes: BTreeMap::new(),
            dirty: Vec::new(),
        })
    }

    fn dangling(&self, id: u64) -> CoreError {
        CoreError::invalid_format(format!("dangling list node {id} in '{}'", self.key.name))
    }

    fn node(&mut self, id: u64) -> CoreResult<ListNode> {
        if let Some(cached) = self.nodes.get(&id) {
            return cached.clone().ok_or_else(|| self.dangling(id));
        }
        let bytes = self
            .store
            .get(&keys::list_node(&self.key.owner, &self.key.name, id))?
            .ok_or_else(|| self.dangling(id))?;
        let node: ListNode = from_cbor(&bytes)?;
        self.nodes.insert(id, Some(node.clone()));
        Ok(node)
    }

    fn put_node(&mut self, id: u64, node: ListNode) {
        self.nodes.insert(id, Some(node));
        self.dirty.push(id);
    }

    fn delete_node(&mut self, id: u64) {
        self.nodes.insert(id, None);
        self.dirty.push(id);
    }

    /// Finds the node at `position`, walking from the nearer end.
    fn node_at(&mut self, position: u32) -> CoreResult<u64> {
        check_index(self.key, position, self.header.size)?;
        let missing = || CoreError::invalid_format("list shorter than its header");
        if position < self.header.size / 2 {
            let mut id = self.header.head.ok_or_else(missing)?;
            for _ in 0..position {
                id = self.node(id)?.next.ok_or_else(missing)?;
            }
            Ok(id)
        } else {
            let mut id = self.header.tail.ok_or_else(missing)?;
            for _ in position + 1..self.header.size {
                id = self.node(id)?.prev.ok_or_else(missing)?;
            }
            Ok(id)
        }
    }

    /// Links a new node before `anchor`, or at the tail if `anchor` is `None`.
    fn insert_before(&mut self, anchor: Option<u64>, slot: Slot) -> CoreResult<()> {
        let id = self.header.next_node;
        self.header.next_node += 1;

        let prev = match anchor {
            Some(next) => {
                let mut next_node = self.node(next)?;
                let prev = next_node.prev;
                next_node.prev = Some(id);
                self.put_node(next, next_node);
                prev
            }
            None => {
                let prev = self.header.tail;
                self.header.tail = Some(id);
                prev
            }
        };
        match prev {
            Some(p) => {
                let mut prev_node = self.node(p)?;
                prev_node.next = Some(id);
                self.put_node(p, prev_node);
            }
            None => self.header.head = Some(id),
        }
        self.put_node(
            id,
            ListNode {
                slot,
                prev,
                next: anchor,
            },
        );
        self.header.size += 1;
        Ok(())
    }

    fn insert(&mut self, position: u32, slots: Vec<Slot>) -> CoreResult<()> {
        check_insert(self.key, position, self.header.size)?;
        grown_size(self.key, self.header.size, slots.len())?;
        // Every new element lands before the one currently at `position`
        let anchor = if position == self.header.size {
            None
        } else {
            Some(self.node_at(position)?)
        };
        for slot in slots {
            self.insert_before(anchor, slot)?;
        }
        Ok(())
    }

    fn remove(&mut self, position: u32) -> CoreResult<Slot> {
        let id = self.node_at(position)?;
        let node = self.node(id)?;
        match node.prev {
            Some(p) => {
                let mut prev = self.node(p)?;
                prev.next = node.next;
                self.put_node(p, prev);
            }
            None => self.header.head = node.next,
        }
        match node.next {
            Some(n) => {
                let mut next = self.node(n)?;
                next.prev = node.prev;
                self.put_node(n, next);
            }
            None => self.header.tail = node.prev,
        }
        self.delete_node(id);
        self.header.size -= 1;
        Ok(node.slot)
    }

    fn finish(mut self) -> CoreResult<WriteBatch> {
        let mut batch = WriteBatch::with_capacity(self.dirty.len() + 1);
        self.dirty.sort_unstable();
        self.dirty.dedup();
        for id in &self.dirty {
            let key = keys::list_node(&self.key.owner, &self.key.name, *id);
            match self.nodes.get(id).and_then(Option::as_ref) {
                Some(node) => batch.put(key, to_cbor(node)?),
                None => batch.delete(key),
            };
        }
        let header_key = ListEncoding::header_key(self.key);
        if self.header.size == 0 {
            batch.delete(header_key);
        } else {
            batch.put(header_key, to_cbor(&self.header)?);
        }
        Ok(batch)
    }
}

impl ListEncoding {
    fn header_key(key: &SingleFeatureKey) -> Vec<u8> {
        keys::feature(keys::LIST_HEADER, &key.owner, &key.name)
    }
}

impl ManyEncoding for ListEncoding {
    fn kind(&self) -> EncodingKind {
        EncodingKind::List
    }

    fn header_tag(&self) -> u8 {
        keys::LIST_HEADER
    }

    fn size(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<u32> {
        Ok(ListEdit::load(store, key)?.header.size)
    }

    fn get(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<Slot> {
        let mut edit = ListEdit::load(store, key)?;
        let id = edit.node_at(position)?;
        Ok(edit.node(id)?.slot)
    }

    fn all(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        let mut edit = ListEdit::load(store, key)?;
        let mut slots = Vec::with_capacity(edit.header.size as usize);
        let mut cursor = edit.header.head;
        while let Some(id) = cursor {
            if slots.len() >= edit.header.size as usize {
                return Err(CoreError::invalid_format("list longer than its header"));
            }
            let node = edit.node(id)?;
            cursor = node.next;
            slots.push(node.slot);
        }
        Ok(slots)
    }

    fn set(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slot: Slot,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let mut edit = ListEdit::load(store, key)?;
        let id = edit.node_at(position)?;
        let mut node = edit.node(id)?;
        let previous = std::mem::replace(&mut node.slot, slot);
        let mut batch = WriteBatch::with_capacity(1);
        batch.put(
            keys::list_node(&key.owner, &key.name, id),
            to_cbor(&node)?,
        );
        Ok((batch, previous))
    }

    fn insert(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
        slots: Vec<Slot>,
    ) -> CoreResult<WriteBatch> {
        let mut edit = ListEdit::load(store, key)?;
        if slots.is_empty() {
            check_insert(key, position, edit.header.size)?;
            return Ok(WriteBatch::new());
        }
        edit.insert(position, slots)?;
        edit.finish()
    }

    fn remove(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        position: u32,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let mut edit = ListEdit::load(store, key)?;
        let removed = edit.remove(position)?;
        Ok((edit.finish()?, removed))
    }

    fn move_within(
        &self,
        store: &dyn KeyValueStore,
        key: &SingleFeatureKey,
        from: u32,
        to: u32,
    ) -> CoreResult<(WriteBatch, Slot)> {
        let mut edit = ListEdit::load(store, key)?;
        let size = edit.header.size;
        check_index(key, from, size)?;
        check_index(key, to, size)?;
        if from == to {
            let id = edit.node_at(from)?;
            return Ok((WriteBatch::new(), edit.node(id)?.slot));
        }
        let slot = edit.remove(from)?;
        edit.insert(to, vec![slot.clone()])?;
        Ok((edit.finish()?, slot))
    }

    fn clear(&self, store: &dyn KeyValueStore, key: &SingleFeatureKey) -> CoreResult<WriteBatch> {
        let mut batch = WriteBatch::new();
        for (k, _) in store.scan_prefix(&keys::feature(keys::LIST_NODE, &key.owner, &key.name))? {
            batch.delete(k);
        }
        batch.delete(Self::header_key(key));
        Ok(batch)
    }
}
