//! Directed traversal with per-node decisions.
//!
//! A traversal walks one relationship overlay from a start node, either
//! rootward (child to parent) or leafward, calling a visitor on every
//! reached node. The visitor is a plain closure over explicit state and
//! returns a [`Decision`] that controls both whether the node is yielded
//! and whether the walk expands past it. This keeps the matching and
//! validation policies pure and unit-testable without a live walk.
//!
//! # Determinism
//! - Expansion is breadth-first; within a node, neighbors are expanded in
//!   edge-creation order.
//! - Each node is visited at most once per traversal, so every traversal
//!   over a finite graph is finite, cycles included.

use crate::graph::store::{Direction, GraphHandle, NodeId, NodeRecord, RelKind};
use std::collections::{HashSet, VecDeque};

/// Outcome of visiting one node.
///
/// The four cases cover the cross product of "yield this node" and
/// "expand past it": `Continue` and `Prune` do not yield, `Emit` and
/// `Stop` do; `Continue` and `Emit` expand, `Stop` and `Prune` do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Do not yield the node; keep walking through it.
    Continue,
    /// Yield the node and keep walking through it.
    Emit,
    /// Yield the node and do not expand past it.
    Stop,
    /// Do not yield the node and do not expand past it.
    Prune,
}

impl Decision {
    #[inline]
    fn yields(self) -> bool {
        matches!(self, Decision::Emit | Decision::Stop)
    }

    #[inline]
    fn expands(self) -> bool {
        matches!(self, Decision::Continue | Decision::Emit)
    }
}

/// Lazy breadth-first walk over one relationship overlay.
///
/// Yields the nodes the visitor chose to emit, in visit order. Obtain one
/// via [`traverse`]; a fresh traversal can be started at any time.
pub struct Traversal<'g, F> {
    graph: &'g GraphHandle,
    kind: RelKind,
    direction: Direction,
    queue: VecDeque<NodeId>,
    seen: HashSet<NodeId>,
    visitor: F,
}

/// Starts a traversal at `start` (which is itself visited first).
pub fn traverse<F>(
    graph: &GraphHandle,
    start: NodeId,
    kind: RelKind,
    direction: Direction,
    visitor: F,
) -> Traversal<'_, F>
where
    F: FnMut(&GraphHandle, &NodeRecord) -> Decision,
{
    let mut queue = VecDeque::new();
    queue.push_back(start);
    Traversal {
        graph,
        kind,
        direction,
        queue,
        seen: HashSet::new(),
        visitor,
    }
}

impl<F> Iterator for Traversal<'_, F>
where
    F: FnMut(&GraphHandle, &NodeRecord) -> Decision,
{
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.queue.pop_front() {
            if !self.seen.insert(id) {
                continue;
            }
            let Some(record) = self.graph.node(id) else {
                debug_assert!(false, "traversal reached a node the store does not hold");
                continue;
            };
            let decision = (self.visitor)(self.graph, record);
            if decision.expands() {
                match self.direction {
                    Direction::Rootward => {
                        self.queue.extend(self.graph.parents(id, self.kind));
                    }
                    Direction::Leafward => {
                        self.queue.extend(self.graph.children(id, self.kind));
                    }
                }
            }
            if decision.yields() {
                return Some(id);
            }
        }
        None
    }
}
