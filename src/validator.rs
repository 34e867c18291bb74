//! Stale-annotation detection.
//!
//! The matcher's on-the-fly propagation restores the ingroup/outgroup
//! invariant along the paths it walks, but it is best-effort and bounded
//! per call; after a batch of merges a sweep confirms (or repairs the
//! bookkeeping for) the rest. Both mechanisms restore the same invariant:
//! every synthesis-scope node's ingroup contains the union of its direct
//! children's ingroups, and its outgroup contains the union of its
//! parents' outgroups. If propagation was correct, the sweep is a no-op.

use crate::graph::store::{Direction, GraphHandle, NodeId, RelKind};
use crate::graph::traverse::{traverse, Decision};
use crate::taxon_set::TaxonSet;

/// Which per-node set an annotation sweep inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    /// The node's ingroup set.
    Ingroup,
    /// The node's outgroup set.
    Outgroup,
}

/// Lazily yields nodes below `root` whose cached sets are stale.
///
/// Staleness follows the direction each annotation flows during merging:
/// ingroup ids accumulate upward, so a node must contain the union of its
/// direct synthesis-scope children's ingroups along `kind`; outgroup ids
/// (exclusions) accumulate downward, so a node must contain the union of
/// its synthesis-scope parents' outgroups. Taxonomy nodes are skipped
/// (their sets are fixed at load time). The iterator is finite and a
/// fresh sweep can be started at any time.
pub fn stale_nodes(
    graph: &GraphHandle,
    root: NodeId,
    kind: RelKind,
) -> impl Iterator<Item = NodeId> + '_ {
    traverse(graph, root, kind, Direction::Leafward, move |g, record| {
        if record.is_taxonomy() {
            return Decision::Continue;
        }
        for child in g.children(record.id(), kind) {
            let Some(child_record) = g.node(child) else {
                continue;
            };
            if !record.ingroup().contains_all(child_record.ingroup()) {
                return Decision::Emit;
            }
        }
        if let Some(outgroup) = record.outgroup() {
            for parent in g.parents(record.id(), kind) {
                let Some(parent_record) = g.node(parent) else {
                    continue;
                };
                if let Some(parent_outgroup) = parent_record.outgroup() {
                    if !outgroup.contains_all(parent_outgroup) {
                        return Decision::Emit;
                    }
                }
            }
        }
        Decision::Continue
    })
}

/// Lazily yields nodes whose chosen annotation does not yet contain all
/// of `ids`, walking `direction` along `kind` from `start`.
///
/// This is the primitive the matcher's propagation passes are built on.
/// Nodes already containing all ids are passed over but the walk
/// continues through them. Taxonomy nodes are skipped unless
/// `visit_taxonomy` is set; a taxonomy node never has an outgroup set to
/// inspect, so an outgroup sweep passes over them regardless.
pub fn missing_annotation_nodes<'g>(
    graph: &'g GraphHandle,
    start: NodeId,
    kind: RelKind,
    direction: Direction,
    which: Annotation,
    ids: &'g TaxonSet,
    visit_taxonomy: bool,
) -> impl Iterator<Item = NodeId> + 'g {
    traverse(graph, start, kind, direction, move |_, record| {
        if record.is_taxonomy() && !visit_taxonomy {
            return Decision::Continue;
        }
        let covered = match which {
            Annotation::Ingroup => record.ingroup().contains_all(ids),
            Annotation::Outgroup => record
                .outgroup()
                .map(|o| o.contains_all(ids))
                .unwrap_or(true),
        };
        if covered {
            Decision::Continue
        } else {
            Decision::Emit
        }
    })
}
