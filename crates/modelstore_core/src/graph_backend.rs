//! Feature mapping over a property graph.
//!
//! Layout:
//!
//! - an entity is a vertex labeled `entity`, keyed by its id
//! - a single attribute is a vertex property named after the feature
//! - a single reference is an edge labeled after the feature
//! - element `i` of a many feature is either a property `name:i` (value)
//!   or an edge labeled `name` with a `position` property (reference);
//!   `name:size` holds the size
//! - the container edge is an `@container` edge carrying a `feature`
//!   property
//! - a class binding is an `@instance_of` edge to a metaclass vertex,
//!   which doubles as the instance index
//!
//! Feature names are stored with every `:` doubled and a leading `@`
//! doubled, so no feature name can collide with a position suffix or a
//! reserved edge label.

use crate::class::ClassDescriptor;
use crate::encoding::{check_index, check_insert, decode_slot, encode_slot, grown_size, move_in_vec};
use crate::error::{CoreError, CoreResult};
use crate::feature::{
    ContainerEdge, ManyFeatureKey, SingleFeatureKey, Slot, StoredFeature, StoredShape,
};
use crate::id::Id;
use crate::mapper::DataMapper;
use modelstore_storage::{EdgeId, GraphData, PropertyGraph};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ENTITY_LABEL: &str = "entity";
const METACLASS_LABEL: &str = "metaclass";
const CONTAINER_EDGE: &str = "@container";
const INSTANCE_OF_EDGE: &str = "@instance_of";
const POSITION_PROPERTY: &str = "position";
const FEATURE_PROPERTY: &str = "feature";
const SIZE_SUFFIX: &str = "size";

/// A [`DataMapper`] storing entities in a [`PropertyGraph`].
///
/// Every operation runs inside one exclusive graph section, so shifts
/// are atomic and linearized. Instance lookups are always supported.
#[derive(Debug)]
pub struct GraphBackend {
    graph: Arc<PropertyGraph>,
    closed: AtomicBool,
}

impl GraphBackend {
    /// Creates a backend over `graph`.
    #[must_use]
    pub fn new(graph: Arc<PropertyGraph>) -> Self {
        info!(
            vertices = graph.read(|g| Ok(g.vertex_count())).unwrap_or(0),
            "opened graph backend"
        );
        Self {
            graph,
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a backend over a fresh graph.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(PropertyGraph::new()))
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &Arc<PropertyGraph> {
        &self.graph
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::BackendClosed)
        } else {
            Ok(())
        }
    }

    fn read<R>(&self, f: impl FnOnce(&GraphData) -> CoreResult<R>) -> CoreResult<R> {
        self.ensure_open()?;
        let mut result = None;
        self.graph.read(|g| {
            result = Some(f(g));
            Ok(())
        })?;
        result.unwrap_or_else(|| Err(CoreError::BackendClosed))
    }

    fn write<R>(&self, f: impl FnOnce(&mut GraphData) -> CoreResult<R>) -> CoreResult<R> {
        self.ensure_open()?;
        let mut result = None;
        self.graph.write(|g| {
            result = Some(f(g));
            Ok(())
        })?;
        result.unwrap_or_else(|| Err(CoreError::BackendClosed))
    }
}

fn vertex_key(id: &Id) -> String {
    id.to_string()
}

fn metaclass_key(class: &ClassDescriptor) -> String {
    format!("class:{class}")
}

/// Escapes a feature name for use as a property name or edge label.
fn stored_name(name: &str) -> String {
    let escaped = name.replace(':', "::");
    if escaped.starts_with('@') {
        format!("@{escaped}")
    } else {
        escaped
    }
}

/// Inverse of [`stored_name`].
fn feature_name(stored: &str) -> String {
    let stored = if stored.starts_with("@@") { &stored[1..] } else { stored };
    stored.replace("::", ":")
}

fn is_reserved_label(label: &str) -> bool {
    label.starts_with('@') && !label.starts_with("@@")
}

/// Splits a stored property name into the stored feature name and the
/// suffix after its separating `:`, if any.
fn split_property(property: &str) -> (&str, Option<&str>) {
    let Some(last) = property.rfind(':') else {
        return (property, None);
    };
    let run = property[..=last].bytes().rev().take_while(|b| *b == b':').count();
    if run % 2 == 1 {
        (&property[..last], Some(&property[last + 1..]))
    } else {
        (property, None)
    }
}

fn size_property(name: &str) -> String {
    format!("{name}:{SIZE_SUFFIX}")
}

fn element_property(name: &str, position: u32) -> String {
    format!("{name}:{position}")
}

fn encode_u32(n: u32) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

fn decode_u32(bytes: &[u8]) -> CoreResult<u32> {
    <[u8; 4]>::try_from(bytes)
        .map(u32::from_be_bytes)
        .map_err(|_| CoreError::invalid_format("bad u32 property"))
}

fn parse_id(key: &str) -> CoreResult<Id> {
    key.parse()
}

fn ensure_entity(g: &mut GraphData, id: &Id) -> String {
    let key = vertex_key(id);
    g.add_vertex(&key, ENTITY_LABEL);
    key
}

/// Reads every element of a many feature.
fn read_many(g: &GraphData, id: &Id, feature: &str) -> CoreResult<Vec<Slot>> {
    let name = &stored_name(feature);
    let key = vertex_key(id);
    let size = match g.property(&key, &size_property(name)) {
        Some(bytes) => decode_u32(bytes)?,
        None => return Ok(Vec::new()),
    };
    let mut slots: Vec<Option<Slot>> = vec![None; size as usize];
    for edge in g.out_edges(&key, Some(name)) {
        if let Some(pos) = edge.property(POSITION_PROPERTY) {
            let pos = decode_u32(pos)? as usize;
            let slot = slots
                .get_mut(pos)
                .ok_or_else(|| CoreError::invalid_format("reference edge past size"))?;
            *slot = Some(Slot::Reference(parse_id(&edge.to)?));
        }
    }
    for (pos, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            let property = element_property(name, pos as u32);
            if let Some(bytes) = g.property(&key, &property) {
                *slot = Some(decode_slot(bytes)?);
            }
        }
    }
    slots
        .into_iter()
        .map(|s| s.ok_or_else(|| CoreError::invalid_format(format!("hole in '{feature}'"))))
        .collect()
}

fn position_edges(g: &GraphData, key: &str, name: &str) -> CoreResult<BTreeMap<u32, EdgeId>> {
    let mut edges = BTreeMap::new();
    for edge in g.out_edges(key, Some(name)) {
        if let Some(pos) = edge.property(POSITION_PROPERTY) {
            edges.insert(decode_u32(pos)?, edge.id);
        }
    }
    Ok(edges)
}

/// Rewrites the positions whose element differs between `old` and `new`.
fn write_many(
    g: &mut GraphData,
    id: &Id,
    feature: &str,
    old: &[Slot],
    new: &[Slot],
) -> CoreResult<()> {
    let name = &stored_name(feature);
    let key = ensure_entity(g, id);
    let edges = position_edges(g, &key, name)?;
    for pos in 0..old.len().max(new.len()) {
        let (before, after) = (old.get(pos), new.get(pos));
        if before == after {
            continue;
        }
        let position = pos as u32;
        match before {
            Some(Slot::Reference(_)) => {
                if let Some(edge) = edges.get(&position) {
                    g.remove_edge(*edge)?;
                }
            }
            Some(Slot::Value(_)) => {
                g.remove_property(&key, &element_property(name, position));
            }
            None => {}
        }
        match after {
            Some(Slot::Reference(target)) => {
                let target = ensure_entity(g, target);
                let props = BTreeMap::from([(POSITION_PROPERTY.to_string(), encode_u32(position))]);
                g.add_edge(name, &key, &target, props)?;
            }
            Some(slot @ Slot::Value(_)) => {
                g.set_property(&key, &element_property(name, position), encode_slot(slot)?)?;
            }
            None => {}
        }
    }
    let size = new.len() as u32;
    if size == 0 {
        g.remove_property(&key, &size_property(name));
    } else {
        g.set_property(&key, &size_property(name), encode_u32(size))?;
    }
    Ok(())
}

fn single_edge(g: &GraphData, key: &str, name: &str) -> Option<(EdgeId, String)> {
    g.out_edges(key, Some(name))
        .into_iter()
        .find(|e| e.property(POSITION_PROPERTY).is_none())
        .map(|e| (e.id, e.to.clone()))
}

fn read_single(g: &GraphData, id: &Id, feature: &str) -> CoreResult<Option<Slot>> {
    let name = &stored_name(feature);
    let key = vertex_key(id);
    if let Some(bytes) = g.property(&key, name) {
        return decode_slot(bytes).map(Some);
    }
    single_edge(g, &key, name)
        .map(|(_, to)| parse_id(&to).map(Slot::Reference))
        .transpose()
}

fn remove_single(g: &mut GraphData, id: &Id, feature: &str) -> CoreResult<Option<Slot>> {
    let previous = read_single(g, id, feature)?;
    let name = &stored_name(feature);
    let key = vertex_key(id);
    g.remove_property(&key, name);
    if let Some((edge, _)) = single_edge(g, &key, name) {
        g.remove_edge(edge)?;
    }
    Ok(previous)
}

fn read_container(g: &GraphData, id: &Id) -> CoreResult<Option<(EdgeId, ContainerEdge)>> {
    let Some(edge) = g.out_edges(&vertex_key(id), Some(CONTAINER_EDGE)).into_iter().next() else {
        return Ok(None);
    };
    let feature = edge
        .property(FEATURE_PROPERTY)
        .ok_or_else(|| CoreError::invalid_format("container edge without feature"))?;
    let feature = String::from_utf8(feature.to_vec())
        .map_err(|_| CoreError::invalid_format("container feature is not UTF-8"))?;
    Ok(Some((edge.id, ContainerEdge::new(parse_id(&edge.to)?, feature))))
}

fn read_class(g: &GraphData, id: &Id) -> CoreResult<Option<ClassDescriptor>> {
    let Some(edge) = g.out_edges(&vertex_key(id), Some(INSTANCE_OF_EDGE)).into_iter().next() else {
        return Ok(None);
    };
    let text = |name: &str| {
        g.property(&edge.to, name)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| CoreError::invalid_format("metaclass vertex without name"))
    };
    Ok(Some(ClassDescriptor::new(text("uri")?, text("name")?)))
}

impl DataMapper for GraphBackend {
    fn name(&self) -> &str {
        "graph"
    }

    fn get_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        self.read(|g| read_single(g, &key.owner, &key.name))
    }

    fn set_single(&self, key: &SingleFeatureKey, slot: Slot) -> CoreResult<Option<Slot>> {
        self.write(|g| {
            let previous = remove_single(g, &key.owner, &key.name)?;
            let vertex = ensure_entity(g, &key.owner);
            let name = stored_name(&key.name);
            match &slot {
                Slot::Value(_) => {
                    g.set_property(&vertex, &name, encode_slot(&slot)?)?;
                }
                Slot::Reference(target) => {
                    let target = ensure_entity(g, target);
                    g.add_edge(&name, &vertex, &target, BTreeMap::new())?;
                }
            }
            Ok(previous)
        })
    }

    fn unset_single(&self, key: &SingleFeatureKey) -> CoreResult<Option<Slot>> {
        self.write(|g| remove_single(g, &key.owner, &key.name))
    }

    fn get_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        self.read(|g| {
            let mut slots = read_many(g, &key.owner, &key.name)?;
            check_index(&key.without_position(), key.position, slots.len() as u32)?;
            Ok(slots.swap_remove(key.position as usize))
        })
    }

    fn set_at(&self, key: &ManyFeatureKey, slot: Slot) -> CoreResult<Slot> {
        self.write(|g| {
            let old = read_many(g, &key.owner, &key.name)?;
            check_index(&key.without_position(), key.position, old.len() as u32)?;
            let mut new = old.clone();
            let previous = std::mem::replace(&mut new[key.position as usize], slot);
            write_many(g, &key.owner, &key.name, &old, &new)?;
            Ok(previous)
        })
    }

    fn insert_all_at(&self, key: &ManyFeatureKey, slots: Vec<Slot>) -> CoreResult<()> {
        self.write(|g| {
            let feature = key.without_position();
            let old = read_many(g, &key.owner, &key.name)?;
            let size = old.len() as u32;
            check_insert(&feature, key.position, size)?;
            grown_size(&feature, size, slots.len())?;
            let mut new = old.clone();
            let at = key.position as usize;
            new.splice(at..at, slots);
            write_many(g, &key.owner, &key.name, &old, &new)
        })
    }

    fn append_all(&self, key: &SingleFeatureKey, slots: Vec<Slot>) -> CoreResult<u32> {
        self.write(|g| {
            let old = read_many(g, &key.owner, &key.name)?;
            let size = old.len() as u32;
            grown_size(key, size, slots.len())?;
            let mut new = old.clone();
            new.extend(slots);
            write_many(g, &key.owner, &key.name, &old, &new)?;
            Ok(size)
        })
    }

    fn remove_at(&self, key: &ManyFeatureKey) -> CoreResult<Slot> {
        self.write(|g| {
            let old = read_many(g, &key.owner, &key.name)?;
            check_index(&key.without_position(), key.position, old.len() as u32)?;
            let mut new = old.clone();
            let removed = new.remove(key.position as usize);
            write_many(g, &key.owner, &key.name, &old, &new)?;
            Ok(removed)
        })
    }

    fn move_slot(&self, source: &ManyFeatureKey, target: &ManyFeatureKey) -> CoreResult<Slot> {
        self.write(|g| {
            let old_source = read_many(g, &source.owner, &source.name)?;
            let source_size = old_source.len() as u32;
            check_index(&source.without_position(), source.position, source_size)?;

            if source.same_feature(target) {
                check_index(&target.without_position(), target.position, source_size)?;
                let mut new = old_source.clone();
                move_in_vec(&mut new, source.position as usize, target.position as usize);
                let moved = new[target.position as usize].clone();
                write_many(g, &source.owner, &source.name, &old_source, &new)?;
                return Ok(moved);
            }

            let old_target = read_many(g, &target.owner, &target.name)?;
            let target_size = old_target.len() as u32;
            check_insert(&target.without_position(), target.position, target_size)?;
            grown_size(&target.without_position(), target_size, 1)?;

            let mut new_source = old_source.clone();
            let moved = new_source.remove(source.position as usize);
            let mut new_target = old_target.clone();
            new_target.insert(target.position as usize, moved.clone());
            write_many(g, &source.owner, &source.name, &old_source, &new_source)?;
            write_many(g, &target.owner, &target.name, &old_target, &new_target)?;
            Ok(moved)
        })
    }

    fn clear(&self, key: &SingleFeatureKey) -> CoreResult<()> {
        self.write(|g| {
            let old = read_many(g, &key.owner, &key.name)?;
            if old.is_empty() {
                return Ok(());
            }
            write_many(g, &key.owner, &key.name, &old, &[])
        })
    }

    fn size_of(&self, key: &SingleFeatureKey) -> CoreResult<u32> {
        self.read(|g| {
            g.property(&vertex_key(&key.owner), &size_property(&stored_name(&key.name)))
                .map_or(Ok(0), decode_u32)
        })
    }

    fn all_of(&self, key: &SingleFeatureKey) -> CoreResult<Vec<Slot>> {
        self.read(|g| read_many(g, &key.owner, &key.name))
    }

    fn container_of(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.read(|g| Ok(read_container(g, id)?.map(|(_, edge)| edge)))
    }

    fn container_for(&self, id: &Id, edge: ContainerEdge) -> CoreResult<Option<ContainerEdge>> {
        self.write(|g| {
            let previous = read_container(g, id)?;
            if let Some((edge_id, _)) = &previous {
                g.remove_edge(*edge_id)?;
            }
            let child = ensure_entity(g, id);
            let container = ensure_entity(g, &edge.container);
            let props = BTreeMap::from([(
                FEATURE_PROPERTY.to_string(),
                edge.feature.as_bytes().to_vec(),
            )]);
            g.add_edge(CONTAINER_EDGE, &child, &container, props)?;
            Ok(previous.map(|(_, e)| e))
        })
    }

    fn remove_container(&self, id: &Id) -> CoreResult<Option<ContainerEdge>> {
        self.write(|g| {
            let previous = read_container(g, id)?;
            if let Some((edge_id, _)) = &previous {
                g.remove_edge(*edge_id)?;
            }
            Ok(previous.map(|(_, e)| e))
        })
    }

    fn class_of(&self, id: &Id) -> CoreResult<Option<ClassDescriptor>> {
        self.read(|g| read_class(g, id))
    }

    fn class_for(&self, id: &Id, class: &ClassDescriptor) -> CoreResult<()> {
        self.write(|g| match read_class(g, id)? {
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
                let meta = metaclass_key(class);
                if g.add_vertex(&meta, METACLASS_LABEL) {
                    g.set_property(&meta, "uri", class.uri.as_bytes().to_vec())?;
                    g.set_property(&meta, "name", class.name.as_bytes().to_vec())?;
                }
                let vertex = ensure_entity(g, id);
                g.add_edge(INSTANCE_OF_EDGE, &vertex, &meta, BTreeMap::new())?;
                Ok(())
            }
        })
    }

    fn all_instances_of_any(&self, classes: &BTreeSet<ClassDescriptor>) -> CoreResult<Vec<Id>> {
        self.read(|g| {
            let mut found = BTreeSet::new();
            for class in classes {
                for edge in g.in_edges(&metaclass_key(class), Some(INSTANCE_OF_EDGE)) {
                    found.insert(parse_id(&edge.from)?);
                }
            }
            Ok(found.into_iter().collect())
        })
    }

    fn entities(&self) -> CoreResult<Vec<Id>> {
        self.read(|g| {
            let mut ids = Vec::new();
            for key in g.vertices_with_label(ENTITY_LABEL) {
                if !g.property_names(&key).is_empty() || !g.out_edges(&key, None).is_empty() {
                    ids.push(parse_id(&key)?);
                }
            }
            ids.sort();
            Ok(ids)
        })
    }

    fn features_of(&self, id: &Id) -> CoreResult<Vec<StoredFeature>> {
        self.read(|g| {
            let key = vertex_key(id);
            let mut features = Vec::new();
            for property in g.property_names(&key) {
                let (stored, suffix) = split_property(&property);
                let shape = match suffix {
                    None => StoredShape::Single,
                    Some(SIZE_SUFFIX) => StoredShape::Many,
                    Some(_) => continue,
                };
                features.push(StoredFeature {
                    name: feature_name(stored),
                    shape,
                });
            }
            for edge in g.out_edges(&key, None) {
                if !is_reserved_label(&edge.label) && edge.property(POSITION_PROPERTY).is_none() {
                    features.push(StoredFeature {
                        name: feature_name(&edge.label),
                        shape: StoredShape::Single,
                    });
                }
            }
            Ok(features)
        })
    }

    fn remove(&self, id: &Id) -> CoreResult<()> {
        self.write(|g| {
            let key = vertex_key(id);
            for property in g.property_names(&key) {
                g.remove_property(&key, &property);
            }
            let outgoing: Vec<EdgeId> = g.out_edges(&key, None).iter().map(|e| e.id).collect();
            for edge in outgoing {
                g.remove_edge(edge)?;
            }
            // Keep the vertex while other entities still point at it
            if g.in_edges(&key, None).is_empty() {
                g.remove_vertex(&key);
            }
            debug!(%id, "removed entity vertex data");
            Ok(())
        })
    }

    fn save(&self) -> CoreResult<()> {
        self.ensure_open()
    }

    fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.graph.close();
        info!("closed graph backend");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
