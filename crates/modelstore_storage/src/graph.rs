//! In-memory property graph.

use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Identifier of an edge, unique within one graph.
pub type EdgeId = u64;

/// A directed, labeled edge with properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Edge identifier.
    pub id: EdgeId,
    /// Edge label.
    pub label: String,
    /// Key of the source vertex.
    pub from: String,
    /// Key of the target vertex.
    pub to: String,
    /// Edge properties.
    pub properties: BTreeMap<String, Vec<u8>>,
}

impl Edge {
    /// Returns a property of this edge.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&[u8]> {
        self.properties.get(name).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default)]
struct VertexData {
    label: String,
    properties: BTreeMap<String, Vec<u8>>,
    out: BTreeSet<EdgeId>,
    inc: BTreeSet<EdgeId>,
}

/// Graph contents, accessed through [`PropertyGraph::read`] and
/// [`PropertyGraph::write`].
///
/// Vertices are addressed by caller-chosen string keys. Edge listings are
/// returned in creation order.
#[derive(Debug, Default)]
pub struct GraphData {
    vertices: HashMap<String, VertexData>,
    edges: HashMap<EdgeId, Edge>,
    next_edge: EdgeId,
}

impl GraphData {
    /// Adds a vertex; returns `false` if it already existed.
    pub fn add_vertex(&mut self, key: &str, label: &str) -> bool {
        if self.vertices.contains_key(key) {
            return false;
        }
        self.vertices.insert(
            key.to_string(),
            VertexData {
                label: label.to_string(),
                ..VertexData::default()
            },
        );
        true
    }

    /// Returns `true` if the vertex exists.
    #[must_use]
    pub fn has_vertex(&self, key: &str) -> bool {
        self.vertices.contains_key(key)
    }

    /// Returns the label of a vertex.
    #[must_use]
    pub fn vertex_label(&self, key: &str) -> Option<&str> {
        self.vertices.get(key).map(|v| v.label.as_str())
    }

    /// Removes a vertex together with all its incident edges.
    pub fn remove_vertex(&mut self, key: &str) -> bool {
        let Some(vertex) = self.vertices.remove(key) else {
            return false;
        };
        for id in vertex.out.iter().chain(vertex.inc.iter()) {
            if let Some(edge) = self.edges.remove(id) {
                if let Some(other) = self.vertices.get_mut(&edge.to) {
                    other.inc.remove(id);
                }
                if let Some(other) = self.vertices.get_mut(&edge.from) {
                    other.out.remove(id);
                }
            }
        }
        true
    }

    /// Returns the keys of every vertex, sorted.
    #[must_use]
    pub fn vertex_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.vertices.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the keys of the vertices carrying `label`, sorted.
    #[must_use]
    pub fn vertices_with_label(&self, label: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .vertices
            .iter()
            .filter(|(_, v)| v.label == label)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns the number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Reads a vertex property.
    #[must_use]
    pub fn property(&self, key: &str, name: &str) -> Option<&[u8]> {
        self.vertices
            .get(key)
            .and_then(|v| v.properties.get(name))
            .map(Vec::as_slice)
    }

    /// Returns the property names of a vertex, sorted.
    #[must_use]
    pub fn property_names(&self, key: &str) -> Vec<String> {
        self.vertices
            .get(key)
            .map(|v| v.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sets a vertex property, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VertexNotFound`] if the vertex is missing.
    pub fn set_property(
        &mut self,
        key: &str,
        name: &str,
        value: Vec<u8>,
    ) -> StorageResult<Option<Vec<u8>>> {
        let vertex = self.vertex_mut(key)?;
        Ok(vertex.properties.insert(name.to_string(), value))
    }

    /// Removes a vertex property, returning the previous value.
    pub fn remove_property(&mut self, key: &str, name: &str) -> Option<Vec<u8>> {
        self.vertices
            .get_mut(key)
            .and_then(|v| v.properties.remove(name))
    }

    /// Adds an edge between two existing vertices.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VertexNotFound`] if either end is missing.
    pub fn add_edge(
        &mut self,
        label: &str,
        from: &str,
        to: &str,
        properties: BTreeMap<String, Vec<u8>>,
    ) -> StorageResult<EdgeId> {
        if !self.vertices.contains_key(to) {
            return Err(StorageError::VertexNotFound { key: to.to_string() });
        }
        let id = self.next_edge;
        self.vertex_mut(from)?.out.insert(id);
        if let Some(target) = self.vertices.get_mut(to) {
            target.inc.insert(id);
        }
        self.next_edge += 1;
        self.edges.insert(
            id,
            Edge {
                id,
                label: label.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                properties,
            },
        );
        Ok(id)
    }

    /// Returns an edge by identifier.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Removes an edge.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EdgeNotFound`] if the edge is missing.
    pub fn remove_edge(&mut self, id: EdgeId) -> StorageResult<Edge> {
        let edge = self
            .edges
            .remove(&id)
            .ok_or(StorageError::EdgeNotFound { id })?;
        if let Some(v) = self.vertices.get_mut(&edge.from) {
            v.out.remove(&id);
        }
        if let Some(v) = self.vertices.get_mut(&edge.to) {
            v.inc.remove(&id);
        }
        Ok(edge)
    }

    /// Sets a property on an edge.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EdgeNotFound`] if the edge is missing.
    pub fn set_edge_property(
        &mut self,
        id: EdgeId,
        name: &str,
        value: Vec<u8>,
    ) -> StorageResult<Option<Vec<u8>>> {
        let edge = self
            .edges
            .get_mut(&id)
            .ok_or(StorageError::EdgeNotFound { id })?;
        Ok(edge.properties.insert(name.to_string(), value))
    }

    /// Returns the outgoing edges of a vertex, optionally filtered by label.
    #[must_use]
    pub fn out_edges(&self, key: &str, label: Option<&str>) -> Vec<&Edge> {
        self.vertices
            .get(key)
            .map(|v| self.collect_edges(&v.out, label))
            .unwrap_or_default()
    }

    /// Returns the incoming edges of a vertex, optionally filtered by label.
    #[must_use]
    pub fn in_edges(&self, key: &str, label: Option<&str>) -> Vec<&Edge> {
        self.vertices
            .get(key)
            .map(|v| self.collect_edges(&v.inc, label))
            .unwrap_or_default()
    }

    fn collect_edges(&self, ids: &BTreeSet<EdgeId>, label: Option<&str>) -> Vec<&Edge> {
        ids.iter()
            .filter_map(|id| self.edges.get(id))
            .filter(|e| label.map_or(true, |l| e.label == l))
            .collect()
    }

    fn vertex_mut(&mut self, key: &str) -> StorageResult<&mut VertexData> {
        self.vertices
            .get_mut(key)
            .ok_or_else(|| StorageError::VertexNotFound { key: key.to_string() })
    }
}

/// A shared in-memory property graph.
///
/// All access goes through [`PropertyGraph::read`] or
/// [`PropertyGraph::write`]; a `write` closure runs under one exclusive
/// lock, so a multi-step mutation becomes visible all at once.
///
/// # Example
///
/// ```rust
/// use modelstore_storage::PropertyGraph;
/// use std::collections::BTreeMap;
///
/// let graph = PropertyGraph::new();
/// graph.write(|g| {
///     g.add_vertex("a", "node");
///     g.add_vertex("b", "node");
///     g.add_edge("next", "a", "b", BTreeMap::new())
/// }).unwrap();
/// let count = graph.read(|g| Ok(g.out_edges("a", Some("next")).len())).unwrap();
/// assert_eq!(count, 1);
/// ```
#[derive(Debug, Default)]
pub struct PropertyGraph {
    data: RwLock<GraphData>,
    closed: AtomicBool,
}

impl PropertyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with shared access to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after [`PropertyGraph::close`], or
    /// whatever `f` returns.
    pub fn read<R>(&self, f: impl FnOnce(&GraphData) -> StorageResult<R>) -> StorageResult<R> {
        self.ensure_open()?;
        f(&self.data.read())
    }

    /// Runs `f` with exclusive access to the graph.
    ///
    /// Callers validate before mutating: an error returned halfway through
    /// `f` does not undo earlier changes made by `f`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after [`PropertyGraph::close`], or
    /// whatever `f` returns.
    pub fn write<R>(
        &self,
        f: impl FnOnce(&mut GraphData) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.ensure_open()?;
        f(&mut self.data.write())
    }

    /// Closes the graph. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn graph_add_vertex_once() {
        let graph = PropertyGraph::new();
        graph
            .write(|g| {
                assert!(g.add_vertex("a", "node"));
                assert!(!g.add_vertex("a", "other"));
                Ok(())
            })
            .unwrap();
        let label = graph.read(|g| Ok(g.vertex_label("a").map(str::to_string))).unwrap();
        assert_eq!(label.as_deref(), Some("node"));
    }

    #[test]
    fn graph_properties() {
        let graph = PropertyGraph::new();
        graph
            .write(|g| {
                g.add_vertex("a", "node");
                assert_eq!(g.set_property("a", "x", vec![1])?, None);
                assert_eq!(g.set_property("a", "x", vec![2])?, Some(vec![1]));
                assert_eq!(g.property("a", "x"), Some(&[2u8][..]));
                assert_eq!(g.remove_property("a", "x"), Some(vec![2]));
                assert!(g.property_names("a").is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn graph_property_on_missing_vertex_fails() {
        let graph = PropertyGraph::new();
        let result = graph.write(|g| g.set_property("missing", "x", vec![1]));
        assert!(matches!(result, Err(StorageError::VertexNotFound { .. })));
    }

    #[test]
    fn graph_edges_by_label() {
        let graph = PropertyGraph::new();
        graph
            .write(|g| {
                g.add_vertex("a", "node");
                g.add_vertex("b", "node");
                g.add_vertex("c", "node");
                g.add_edge("child", "a", "b", props(&[("position", &[0])]))?;
                g.add_edge("child", "a", "c", props(&[("position", &[1])]))?;
                g.add_edge("other", "a", "c", BTreeMap::new())?;
                Ok(())
            })
            .unwrap();

        graph
            .read(|g| {
                let children = g.out_edges("a", Some("child"));
                assert_eq!(children.len(), 2);
                assert_eq!(children[0].to, "b");
                assert_eq!(children[1].property("position"), Some(&[1u8][..]));
                assert_eq!(g.out_edges("a", None).len(), 3);
                assert_eq!(g.in_edges("c", None).len(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn graph_remove_vertex_drops_incident_edges() {
        let graph = PropertyGraph::new();
        graph
            .write(|g| {
                g.add_vertex("a", "node");
                g.add_vertex("b", "node");
                g.add_edge("link", "a", "b", BTreeMap::new())?;
                g.add_edge("link", "b", "a", BTreeMap::new())?;
                assert!(g.remove_vertex("b"));
                assert_eq!(g.edge_count(), 0);
                assert!(g.out_edges("a", None).is_empty());
                assert!(g.in_edges("a", None).is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn graph_remove_edge_and_set_property() {
        let graph = PropertyGraph::new();
        graph
            .write(|g| {
                g.add_vertex("a", "node");
                let id = g.add_edge("self", "a", "a", BTreeMap::new())?;
                g.set_edge_property(id, "w", vec![7])?;
                assert_eq!(g.edge(id).and_then(|e| e.property("w")), Some(&[7u8][..]));
                g.remove_edge(id)?;
                assert!(matches!(g.remove_edge(id), Err(StorageError::EdgeNotFound { .. })));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn graph_vertices_with_label() {
        let graph = PropertyGraph::new();
        graph
            .write(|g| {
                g.add_vertex("b", "meta");
                g.add_vertex("a", "meta");
                g.add_vertex("c", "node");
                Ok(())
            })
            .unwrap();
        let metas = graph.read(|g| Ok(g.vertices_with_label("meta"))).unwrap();
        assert_eq!(metas, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn graph_closed_rejects_access() {
        let graph = PropertyGraph::new();
        graph.close();
        graph.close();
        assert!(matches!(graph.read(|g| Ok(g.vertex_count())), Err(StorageError::Closed)));
    }
}
