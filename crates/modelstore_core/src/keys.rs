//! Record key layout of key-value backends.
//!
//! Every record key starts with a one-byte tag:
//!
//! | tag | record | key parts |
//! |-----|--------|-----------|
//! | `#` | store metadata | - |
//! | `F` | single-valued feature | owner, name |
//! | `C` | class binding | owner |
//! | `P` | container edge | owner |
//! | `I` | instance index entry | uri, class name, owner |
//! | `S` | indexed encoding size | owner, name |
//! | `M` | indexed encoding element | owner, name, position |
//! | `A` | array encoding blob | owner, name |
//! | `L` | list encoding header | owner, name |
//! | `N` | list encoding node | owner, name, node id |

use crate::class::ClassDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use modelstore_codec::{KeyBuilder, KeyReader};

pub(crate) const META: u8 = b'#';
pub(crate) const SINGLE: u8 = b'F';
pub(crate) const CLASS: u8 = b'C';
pub(crate) const CONTAINER: u8 = b'P';
pub(crate) const INSTANCE: u8 = b'I';
pub(crate) const INDEXED_SIZE: u8 = b'S';
pub(crate) const INDEXED_ELEMENT: u8 = b'M';
pub(crate) const ARRAY: u8 = b'A';
pub(crate) const LIST_HEADER: u8 = b'L';
pub(crate) const LIST_NODE: u8 = b'N';

/// Returns a human-readable name for a record tag.
#[must_use]
pub fn record_kind(tag: u8) -> &'static str {
    match tag {
        META => "metadata",
        SINGLE => "single-feature",
        CLASS => "class",
        CONTAINER => "container",
        INSTANCE => "instance-index",
        INDEXED_SIZE => "indexed-size",
        INDEXED_ELEMENT => "indexed-element",
        ARRAY => "array",
        LIST_HEADER => "list-header",
        LIST_NODE => "list-node",
        _ => "unknown",
    }
}

pub(crate) fn meta() -> Vec<u8> {
    KeyBuilder::new(META).build()
}

pub(crate) fn tag_prefix(tag: u8) -> Vec<u8> {
    KeyBuilder::new(tag).build()
}

pub(crate) fn owner(tag: u8, owner: &Id) -> Vec<u8> {
    KeyBuilder::new(tag).segment(owner.as_bytes()).build()
}

pub(crate) fn feature(tag: u8, owner: &Id, name: &str) -> Vec<u8> {
    feature_builder(tag, owner, name).build()
}

pub(crate) fn feature_builder(tag: u8, owner: &Id, name: &str) -> KeyBuilder {
    KeyBuilder::new(tag).segment(owner.as_bytes()).text(name)
}

pub(crate) fn indexed_element(owner: &Id, name: &str, position: u32) -> Vec<u8> {
    feature_builder(INDEXED_ELEMENT, owner, name).u32(position).build()
}

pub(crate) fn list_node(owner: &Id, name: &str, node: u64) -> Vec<u8> {
    feature_builder(LIST_NODE, owner, name).u64(node).build()
}

pub(crate) fn instance_prefix(class: &ClassDescriptor) -> Vec<u8> {
    KeyBuilder::new(INSTANCE)
        .text(&class.uri)
        .text(&class.name)
        .build()
}

pub(crate) fn instance(class: &ClassDescriptor, owner: &Id) -> Vec<u8> {
    KeyBuilder::new(INSTANCE)
        .text(&class.uri)
        .text(&class.name)
        .segment(owner.as_bytes())
        .build()
}

fn read_id(reader: &mut KeyReader<'_>) -> CoreResult<Id> {
    let bytes = reader.segment()?;
    Id::from_slice(bytes)
        .ok_or_else(|| CoreError::invalid_format(format!("id segment of {} bytes", bytes.len())))
}

/// Reads the owner of an `owner`-shaped or `feature`-shaped key.
pub(crate) fn parse_owner(key: &[u8], tag: u8) -> CoreResult<Id> {
    let mut reader = KeyReader::new(key, tag)?;
    read_id(&mut reader)
}

/// Reads the owner and feature name of a `feature`-shaped key.
pub(crate) fn parse_feature(key: &[u8], tag: u8) -> CoreResult<(Id, String)> {
    let mut reader = KeyReader::new(key, tag)?;
    let owner = read_id(&mut reader)?;
    let name = reader.text()?.to_string();
    Ok((owner, name))
}

/// Reads the owner of an instance index key.
pub(crate) fn parse_instance(key: &[u8]) -> CoreResult<Id> {
    let mut reader = KeyReader::new(key, INSTANCE)?;
    reader.segment()?;
    reader.segment()?;
    read_id(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_keys_parse_back() {
        let id = Id::generate();
        let key = feature(SINGLE, &id, "name");
        assert_eq!(parse_feature(&key, SINGLE).unwrap(), (id, "name".to_string()));
        assert_eq!(parse_owner(&key, SINGLE).unwrap(), id);
    }

    #[test]
    fn element_keys_share_feature_prefix() {
        let id = Id::generate();
        let prefix = feature(INDEXED_ELEMENT, &id, "items");
        assert!(indexed_element(&id, "items", 9).starts_with(&prefix));
        assert!(!indexed_element(&id, "items2", 0).starts_with(&prefix));
    }

    #[test]
    fn instance_keys() {
        let id = Id::generate();
        let class = ClassDescriptor::new("uri", "Shape");
        let key = instance(&class, &id);
        assert!(key.starts_with(&instance_prefix(&class)));
        assert_eq!(parse_instance(&key).unwrap(), id);
        // Prefix of a class never matches a longer class name
        let other = ClassDescriptor::new("uri", "ShapeGroup");
        assert!(!instance(&other, &id).starts_with(&instance_prefix(&class)));
    }

    #[test]
    fn record_kinds() {
        assert_eq!(record_kind(CLASS), "class");
        assert_eq!(record_kind(b'z'), "unknown");
    }
}
