//! Post-synthesis topology repair.
//!
//! Merging source trees strictly in rank order can still attach a node's
//! accepted children before a sibling subtree carrying part of the node's
//! recorded scope has been merged. The symptom is a node whose children's
//! unioned coverage does not reach its own ingroup. The repair pass walks
//! the synthesis overlay bottom-up and, at each such node, detaches every
//! current child and reattaches it one level up, bypassing the node.
//! This corrects topology only: no ingroup or outgroup set is touched.
//!
//! # Determinism
//! - Roots of the depth-first order are taken in ascending node id.
//! - Children are expanded in edge-creation order.

use crate::graph::store::{EdgeId, GraphHandle, NodeId, RelKind, StoreError};
use crate::taxon_set::TaxonSet;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// What a repair pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Nodes whose children were reattached to their parent, in the order
    /// they were bypassed.
    pub bypassed: Vec<NodeId>,
}

impl RepairReport {
    /// Returns `true` if the pass changed nothing.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.bypassed.is_empty()
    }
}

/// Error raised by a repair pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    /// The synthesis overlay contains a directed cycle through this node.
    Cycle {
        /// A node on the cycle.
        node: NodeId,
    },
    /// The root fails the coverage check and has no parent to lift its
    /// children to.
    InconsistentRoot {
        /// The failing root.
        node: NodeId,
        /// Ingroup ids no child subtree accounts for.
        missing: TaxonSet,
    },
    /// A reference into the store did not resolve.
    Store(StoreError),
}

impl fmt::Display for RepairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairError::Cycle { node } => {
                write!(f, "synthesis overlay contains a cycle through {}", node)
            }
            RepairError::InconsistentRoot { node, missing } => write!(
                f,
                "root {} is missing coverage for taxa {} and cannot be bypassed",
                node, missing
            ),
            RepairError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for RepairError {}

impl From<StoreError> for RepairError {
    fn from(e: StoreError) -> Self {
        RepairError::Store(e)
    }
}

/// Repairs the synthesis overlay in one bottom-up pass.
///
/// Each node is processed only after all of its current children. A leaf
/// (no synthesis children) covers exactly itself; an internal node's
/// coverage is the union of its children's. A node whose coverage does
/// not contain its own ingroup has every child detached and reattached to
/// the node's single synthesis parent; a parentless such node is fatal.
pub fn repair(graph: &mut GraphHandle) -> Result<RepairReport, RepairError> {
    let order = topological_order(graph)?;
    let mut coverage: HashMap<NodeId, TaxonSet> = HashMap::new();
    let mut report = RepairReport::default();

    for node in order {
        let children: Vec<NodeId> = graph.children(node, RelKind::Synthesis).collect();
        if children.is_empty() {
            coverage.insert(node, TaxonSet::singleton(node.as_u64()));
            continue;
        }
        let mut covered = TaxonSet::new();
        for child in &children {
            // Children precede parents in the order, and reattachment only
            // moves nodes upward, so every child has an entry by now.
            if let Some(set) = coverage.get(child) {
                covered.union_with(set);
            } else {
                debug_assert!(false, "child processed after its parent");
            }
        }

        let ingroup = graph.ingroup(node)?;
        if !covered.contains_all(ingroup) {
            let missing = ingroup.difference(&covered);
            let parent = graph
                .single_parent(node, RelKind::Synthesis)?
                .ok_or_else(|| RepairError::InconsistentRoot {
                    node,
                    missing: missing.clone(),
                })?;
            warn!(
                node = node.as_u64(),
                missing = %missing,
                "children do not cover recorded scope, reattaching them one level up"
            );
            let edges: Vec<EdgeId> = graph
                .child_edges(node, RelKind::Synthesis)
                .map(|e| e.id)
                .collect();
            for edge in edges {
                let child = graph.edge(edge)?.child;
                graph.delete_edge(edge)?;
                graph.create_edge(child, parent, RelKind::Synthesis)?;
            }
            report.bypassed.push(node);
        }
        // The (possibly insufficient) union stands in for this node when
        // its parent is processed, mirroring the bypass.
        coverage.insert(node, covered);
    }

    Ok(report)
}

/// Returns every node touching the synthesis overlay, children strictly
/// before parents.
fn topological_order(graph: &GraphHandle) -> Result<Vec<NodeId>, RepairError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    let mut order = Vec::new();

    for root in graph.nodes_sorted() {
        let touches_overlay = graph.child_edges(root, RelKind::Synthesis).next().is_some()
            || graph.parent_edges(root, RelKind::Synthesis).next().is_some();
        if !touches_overlay || marks.contains_key(&root) {
            continue;
        }

        let mut stack: Vec<(NodeId, std::vec::IntoIter<NodeId>)> = Vec::new();
        marks.insert(root, Mark::InProgress);
        let children: Vec<NodeId> = graph.children(root, RelKind::Synthesis).collect();
        stack.push((root, children.into_iter()));

        while let Some((node, iter)) = stack.last_mut() {
            match iter.next() {
                Some(child) => match marks.get(&child) {
                    Some(Mark::InProgress) => {
                        return Err(RepairError::Cycle { node: child });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::InProgress);
                        let grandchildren: Vec<NodeId> =
                            graph.children(child, RelKind::Synthesis).collect();
                        stack.push((child, grandchildren.into_iter()));
                    }
                },
                None => {
                    let node = *node;
                    marks.insert(node, Mark::Done);
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_ingroup(graph: &mut GraphHandle, ingroup: &[u64]) -> NodeId {
        let id = graph.create_node();
        graph
            .ingroup_mut(id)
            .unwrap()
            .extend(ingroup.iter().copied());
        id
    }

    #[test]
    fn topological_order_is_bottom_up() {
        let mut graph = GraphHandle::new();
        let leaf_a = graph.create_node();
        let leaf_b = graph.create_node();
        let mid = graph.create_node();
        let root = graph.create_node();
        graph.create_edge(leaf_a, mid, RelKind::Synthesis).unwrap();
        graph.create_edge(leaf_b, mid, RelKind::Synthesis).unwrap();
        graph.create_edge(mid, root, RelKind::Synthesis).unwrap();

        let order = topological_order(&graph).unwrap();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(leaf_a) < pos(mid));
        assert!(pos(leaf_b) < pos(mid));
        assert!(pos(mid) < pos(root));
    }

    #[test]
    fn undercovered_node_is_bypassed() {
        let mut graph = GraphHandle::new();
        let u = graph.create_node(); // taxon 0
        let v = graph.create_node(); // taxon 1
        let w = graph.create_node(); // taxon 2
        let inner = node_with_ingroup(&mut graph, &[0, 1]);
        // The node's recorded scope claims taxon 7 which no child covers.
        let bad = node_with_ingroup(&mut graph, &[0, 1, 2, 7]);
        let top = node_with_ingroup(&mut graph, &[0, 1, 2]);
        graph.create_edge(u, inner, RelKind::Synthesis).unwrap();
        graph.create_edge(v, inner, RelKind::Synthesis).unwrap();
        graph.create_edge(inner, bad, RelKind::Synthesis).unwrap();
        graph.create_edge(w, bad, RelKind::Synthesis).unwrap();
        graph.create_edge(bad, top, RelKind::Synthesis).unwrap();

        let report = repair(&mut graph).unwrap();
        assert_eq!(report.bypassed, vec![bad]);
        // Both children moved up to the grandparent; the bypassed node
        // stays attached but childless.
        assert_eq!(
            graph.parents(inner, RelKind::Synthesis).collect::<Vec<_>>(),
            vec![top]
        );
        assert_eq!(
            graph.parents(w, RelKind::Synthesis).collect::<Vec<_>>(),
            vec![top]
        );
        assert_eq!(graph.children(bad, RelKind::Synthesis).count(), 0);
        assert_eq!(
            graph.parents(bad, RelKind::Synthesis).collect::<Vec<_>>(),
            vec![top]
        );
        // Sets are untouched by repair.
        assert_eq!(graph.ingroup(bad).unwrap().to_sorted_vec(), vec![0, 1, 2, 7]);
    }

    #[test]
    fn consistent_overlay_is_untouched() {
        let mut graph = GraphHandle::new();
        let a = graph.create_node();
        let b = graph.create_node();
        let parent = node_with_ingroup(&mut graph, &[0, 1]);
        graph.create_edge(a, parent, RelKind::Synthesis).unwrap();
        graph.create_edge(b, parent, RelKind::Synthesis).unwrap();

        let report = repair(&mut graph).unwrap();
        assert!(report.is_clean());
        assert_eq!(
            graph.parents(a, RelKind::Synthesis).collect::<Vec<_>>(),
            vec![parent]
        );
    }

    #[test]
    fn inconsistent_root_is_fatal() {
        let mut graph = GraphHandle::new();
        let a = graph.create_node();
        let root = node_with_ingroup(&mut graph, &[0, 5]);
        graph.create_edge(a, root, RelKind::Synthesis).unwrap();

        let err = repair(&mut graph).unwrap_err();
        match err {
            RepairError::InconsistentRoot { node, missing } => {
                assert_eq!(node, root);
                assert_eq!(missing.to_sorted_vec(), vec![5]);
            }
            other => panic!("expected an inconsistent root, got {other:?}"),
        }
    }

    #[test]
    fn cycle_is_fatal() {
        let mut graph = GraphHandle::new();
        let a = graph.create_node();
        let b = graph.create_node();
        graph.create_edge(a, b, RelKind::Synthesis).unwrap();
        graph.create_edge(b, a, RelKind::Synthesis).unwrap();

        assert!(matches!(
            repair(&mut graph),
            Err(RepairError::Cycle { .. })
        ));
    }
}
