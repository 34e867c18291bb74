//! In-memory graph store with per-node set annotations.
//!
//! `GraphHandle` owns the node set shared by every topology overlay:
//! taxonomy edges, per-source-tree edges, and accepted synthesis edges are
//! distinct relationship kinds over the same nodes. Each node carries an
//! `ingroup` set (the taxa its subtree contains within the current merge
//! scope) and an optional `outgroup` set (taxa known to be excluded).
//! A node without an outgroup set is a pure-taxonomy node whose outgroup
//! is implicitly the universe minus its ingroup; this keeps untouched
//! taxonomic subtrees from storing enormous complement sets.
//!
//! # Invariants
//! - Node ids are unique and never reused; nodes are never deleted.
//! - Every edge refers to existing nodes (checked at creation).
//! - Adjacency lists are kept in edge-creation order, which is stable and
//!   deterministic for a given sequence of operations.
//!
//! There is no process-wide state: every core operation takes a
//! `&GraphHandle` or `&mut GraphHandle` explicitly.

use crate::taxon_set::TaxonSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a node in the graph.
///
/// A transparent `u64` wrapper; leaf node ids double as taxon ids in
/// ingroup/outgroup sets, so `as_u64` is the bridge into [`TaxonSet`].
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a `NodeId` from a raw `u64`.
    ///
    /// Prefer ids returned by [`GraphHandle::create_node`]; the store does
    /// not check that constructed ids exist until they are used.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw `u64` representation.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Unique identifier for an edge in the graph.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EdgeId(u64);

impl EdgeId {
    /// Returns the raw `u64` representation.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge {}", self.0)
    }
}

/// Relationship kinds overlaying the shared node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelKind {
    /// Child-of edge in the reference taxonomy.
    Taxonomy,
    /// Child-of edge contributed by a source tree during merging.
    SourceTree,
    /// Child-of edge accepted into the synthetic tree.
    Synthesis,
}

/// Direction of a walk over child-to-parent edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Follow edges from child to parent (toward ancestors).
    Rootward,
    /// Follow edges from parent to child (toward leaves).
    Leafward,
}

/// A node and its annotations.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    id: NodeId,
    name: Option<String>,
    ingroup: TaxonSet,
    outgroup: Option<TaxonSet>,
}

impl NodeRecord {
    /// Returns this node's id.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the display name, if one was assigned.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the ingroup set.
    #[inline]
    pub fn ingroup(&self) -> &TaxonSet {
        &self.ingroup
    }

    /// Returns the outgroup set, or `None` for a pure-taxonomy node.
    #[inline]
    pub fn outgroup(&self) -> Option<&TaxonSet> {
        self.outgroup.as_ref()
    }

    /// Returns `true` if this node has no explicit outgroup set.
    #[inline]
    pub fn is_taxonomy(&self) -> bool {
        self.outgroup.is_none()
    }
}

/// A directed child-to-parent edge of one relationship kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// This edge's id.
    pub id: EdgeId,
    /// The child endpoint.
    pub child: NodeId,
    /// The parent endpoint.
    pub parent: NodeId,
    /// The overlay this edge belongs to.
    pub kind: RelKind,
}

/// Error raised when a reference into the store does not resolve.
///
/// These indicate either caller bugs (stale ids) or store corruption, and
/// propagate unchanged through the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No node with the given id exists.
    MissingNode(NodeId),
    /// No edge with the given id exists.
    MissingEdge(EdgeId),
    /// The node has no outgroup set but one was required.
    MissingOutgroup(NodeId),
    /// A single parent was requested but the node has several.
    MultipleParents(NodeId),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::MissingNode(id) => write!(f, "no such node: {}", id),
            StoreError::MissingEdge(id) => write!(f, "no such edge: {}", id),
            StoreError::MissingOutgroup(id) => {
                write!(f, "{} has no outgroup set", id)
            }
            StoreError::MultipleParents(id) => {
                write!(f, "{} has more than one parent of the requested kind", id)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// The shared graph all overlays are built over.
#[derive(Debug, Clone, Default)]
pub struct GraphHandle {
    nodes: HashMap<NodeId, NodeRecord>,
    edges: HashMap<EdgeId, EdgeRecord>,
    /// Edges in which the key node is the child (its parent edges).
    rootward: HashMap<NodeId, Vec<EdgeId>>,
    /// Edges in which the key node is the parent (its child edges).
    leafward: HashMap<NodeId, Vec<EdgeId>>,
    next_node: u64,
    next_edge: u64,
}

impl GraphHandle {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node with an empty ingroup and no outgroup set.
    pub fn create_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            NodeRecord {
                id,
                name: None,
                ingroup: TaxonSet::new(),
                outgroup: None,
            },
        );
        id
    }

    /// Creates a node carrying a display name, used in diagnostics.
    pub fn create_named_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.create_node();
        if let Some(record) = self.nodes.get_mut(&id) {
            record.name = Some(name.into());
        }
        id
    }

    /// Creates a child-to-parent edge of the given kind.
    pub fn create_edge(
        &mut self,
        child: NodeId,
        parent: NodeId,
        kind: RelKind,
    ) -> Result<EdgeId, StoreError> {
        self.require(child)?;
        self.require(parent)?;
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(
            id,
            EdgeRecord {
                id,
                child,
                parent,
                kind,
            },
        );
        self.rootward.entry(child).or_default().push(id);
        self.leafward.entry(parent).or_default().push(id);
        Ok(id)
    }

    /// Deletes an edge. Nodes are never deleted.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<(), StoreError> {
        let record = self.edges.remove(&id).ok_or(StoreError::MissingEdge(id))?;
        if let Some(out) = self.rootward.get_mut(&record.child) {
            out.retain(|&e| e != id);
        }
        if let Some(inc) = self.leafward.get_mut(&record.parent) {
            inc.retain(|&e| e != id);
        }
        Ok(())
    }

    /// Returns `true` if the node exists.
    #[inline]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Returns the number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges across all kinds.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Looks up a node record.
    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    /// Looks up an edge record.
    pub fn edge(&self, id: EdgeId) -> Result<&EdgeRecord, StoreError> {
        self.edges.get(&id).ok_or(StoreError::MissingEdge(id))
    }

    /// Returns the node's ingroup set.
    pub fn ingroup(&self, id: NodeId) -> Result<&TaxonSet, StoreError> {
        Ok(&self.require(id)?.ingroup)
    }

    /// Returns the node's ingroup set for mutation.
    pub fn ingroup_mut(&mut self, id: NodeId) -> Result<&mut TaxonSet, StoreError> {
        let record = self.nodes.get_mut(&id).ok_or(StoreError::MissingNode(id))?;
        Ok(&mut record.ingroup)
    }

    /// Returns the node's outgroup set, or `None` for taxonomy nodes.
    pub fn outgroup(&self, id: NodeId) -> Result<Option<&TaxonSet>, StoreError> {
        Ok(self.require(id)?.outgroup.as_ref())
    }

    /// Returns the node's outgroup set for mutation.
    ///
    /// Fails with [`StoreError::MissingOutgroup`] on a taxonomy node; use
    /// [`GraphHandle::set_outgroup`] to move a node into synthesis scope.
    pub fn outgroup_mut(&mut self, id: NodeId) -> Result<&mut TaxonSet, StoreError> {
        let record = self.nodes.get_mut(&id).ok_or(StoreError::MissingNode(id))?;
        record
            .outgroup
            .as_mut()
            .ok_or(StoreError::MissingOutgroup(id))
    }

    /// Sets (or replaces) the node's outgroup set, moving it into
    /// synthesis scope.
    pub fn set_outgroup(&mut self, id: NodeId, outgroup: TaxonSet) -> Result<(), StoreError> {
        let record = self.nodes.get_mut(&id).ok_or(StoreError::MissingNode(id))?;
        record.outgroup = Some(outgroup);
        Ok(())
    }

    /// Returns `true` if the node has an explicit outgroup set.
    pub fn has_outgroup(&self, id: NodeId) -> Result<bool, StoreError> {
        Ok(self.require(id)?.outgroup.is_some())
    }

    /// Iterates the node's parent edges of the given kind, in creation
    /// order.
    pub fn parent_edges(
        &self,
        id: NodeId,
        kind: RelKind,
    ) -> impl Iterator<Item = &EdgeRecord> + '_ {
        self.typed_edges(&self.rootward, id, kind)
    }

    /// Iterates the node's parents along the given kind.
    pub fn parents(&self, id: NodeId, kind: RelKind) -> impl Iterator<Item = NodeId> + '_ {
        self.parent_edges(id, kind).map(|e| e.parent)
    }

    /// Iterates the node's child edges of the given kind, in creation
    /// order.
    pub fn child_edges(
        &self,
        id: NodeId,
        kind: RelKind,
    ) -> impl Iterator<Item = &EdgeRecord> + '_ {
        self.typed_edges(&self.leafward, id, kind)
    }

    /// Iterates the node's children along the given kind.
    pub fn children(&self, id: NodeId, kind: RelKind) -> impl Iterator<Item = NodeId> + '_ {
        self.child_edges(id, kind).map(|e| e.child)
    }

    /// Returns the node's single parent of the given kind, `None` if it
    /// has no parent, or an error if it has several.
    pub fn single_parent(
        &self,
        id: NodeId,
        kind: RelKind,
    ) -> Result<Option<NodeId>, StoreError> {
        self.require(id)?;
        let mut parents = self.parents(id, kind);
        let first = parents.next();
        if parents.next().is_some() {
            return Err(StoreError::MultipleParents(id));
        }
        Ok(first)
    }

    /// Returns all node ids in ascending order.
    ///
    /// This is guaranteed to produce the same sequence across runs for the
    /// same sequence of store operations.
    pub fn nodes_sorted(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    fn typed_edges<'a>(
        &'a self,
        index: &'a HashMap<NodeId, Vec<EdgeId>>,
        id: NodeId,
        kind: RelKind,
    ) -> impl Iterator<Item = &'a EdgeRecord> + 'a {
        index
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |eid| {
                let record = self.edges.get(eid);
                debug_assert!(record.is_some(), "adjacency references a deleted edge");
                record
            })
            .filter(move |e| e.kind == kind)
    }

    fn require(&self, id: NodeId) -> Result<&NodeRecord, StoreError> {
        self.nodes.get(&id).ok_or(StoreError::MissingNode(id))
    }
}
