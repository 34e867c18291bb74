//! Bipartition-to-graph matching (LICA search).
//!
//! Given one source-tree bipartition and a seed node known to carry at
//! least one ingroup id (typically a mapped leaf), the matcher walks
//! rootward to find the least inclusive node whose annotations are
//! compatible with the bipartition, extends that node's ingroup/outgroup
//! sets with the bipartition's ids, and propagates the extension: newly
//! added ingroup ids flow up to every ancestor still missing them, newly
//! added outgroup ids flow down to every synthesis-scope descendant still
//! missing them. A node whose cached sets contradict the extension (an
//! ancestor excluding a taxon its descendant now contains, or the mirror
//! case) aborts the merge with a [`ConsistencyViolation`].
//!
//! Matching policy per node, in test order:
//! - synthesis-scope node (has an outgroup set): the path is rejected if
//!   the node's ingroup meets the bipartition's outgroup or the node's
//!   outgroup meets the bipartition's ingroup; otherwise the node is the
//!   LICA if its ingroup meets the bipartition's ingroup.
//! - taxonomy node (no outgroup set): accepted only if its ingroup is
//!   disjoint from the bipartition's outgroup and contains the whole
//!   bipartition ingroup.
//!
//! For a well-formed history exactly one node accepts. Several accepting
//! is a defect in prior merges: logged and resolved to the first in visit
//! order by default, fatal under [`MatchOptions::strict`].

use crate::bipartition::Bipartition;
use crate::graph::store::{Direction, GraphHandle, NodeId, NodeRecord, RelKind, StoreError};
use crate::graph::traverse::{traverse, Decision};
use crate::taxon_set::TaxonSet;
use crate::validator::{missing_annotation_nodes, Annotation};
use std::fmt;
use tracing::{debug, warn};

/// Knobs for one matching pass.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Relationship overlay to walk and to attach created nodes with.
    pub kind: RelKind,
    /// Treat an ambiguous LICA (several accepting nodes) as fatal.
    pub strict: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            kind: RelKind::SourceTree,
            strict: false,
        }
    }
}

/// How the bipartition was resolved to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// An existing node accepted the bipartition and was extended.
    Matched(NodeId),
    /// No node accepted; a fresh node carrying the bipartition's sets was
    /// created as a parent of the seed.
    Created(NodeId),
}

impl MatchOutcome {
    /// The node representing the bipartition, however it was obtained.
    #[inline]
    pub fn node(&self) -> NodeId {
        match self {
            MatchOutcome::Matched(id) | MatchOutcome::Created(id) => *id,
        }
    }
}

/// A topological contradiction between cached annotations.
///
/// Raised when a merge would record a taxon inside a subtree whose
/// ancestor has that taxon in its outgroup (or the mirror case on the way
/// down). Indicates contradictory source trees or prior merges; the batch
/// must not be retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyViolation {
    /// The node whose outgroup excludes the offending taxa.
    pub ancestor: NodeId,
    /// The node whose ingroup now contains them.
    pub descendant: NodeId,
    /// The taxa claimed by both sides.
    pub offending: TaxonSet,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} excludes taxa {} that its descendant {} contains",
            self.ancestor, self.offending, self.descendant
        )
    }
}

/// Error raised by a matching pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// Cached annotations contradict the requested merge.
    Consistency(ConsistencyViolation),
    /// More than one node accepted the bipartition (strict mode only).
    AmbiguousLica {
        /// Every accepting node, in visit order.
        accepted: Vec<NodeId>,
    },
    /// A reference into the store did not resolve.
    Store(StoreError),
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::Consistency(v) => write!(f, "consistency violation: {}", v),
            MatchError::AmbiguousLica { accepted } => {
                write!(f, "{} nodes accepted one bipartition:", accepted.len())?;
                for id in accepted {
                    write!(f, " {}", id)?;
                }
                Ok(())
            }
            MatchError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for MatchError {}

impl From<StoreError> for MatchError {
    fn from(e: StoreError) -> Self {
        MatchError::Store(e)
    }
}

/// Pure matching policy for a single node.
///
/// Returns [`Decision::Stop`] when the node is compatible with the
/// bipartition (it is a LICA candidate) and [`Decision::Continue`]
/// otherwise. Takes no graph handle, so the policy is testable in
/// isolation.
pub fn classify(node: &NodeRecord, bipartition: &Bipartition) -> Decision {
    let ingroup = node.ingroup();
    match node.outgroup() {
        Some(outgroup) => {
            if ingroup.contains_any(&bipartition.outgroup)
                || outgroup.contains_any(&bipartition.ingroup)
            {
                // Definitely not an ancestor consistent with this split.
                Decision::Continue
            } else if ingroup.contains_any(&bipartition.ingroup) {
                Decision::Stop
            } else {
                Decision::Continue
            }
        }
        None => {
            if !ingroup.contains_any(&bipartition.outgroup)
                && ingroup.contains_all(&bipartition.ingroup)
            {
                Decision::Stop
            } else {
                Decision::Continue
            }
        }
    }
}

/// Finds the LICA for a bipartition without touching any annotation.
///
/// Returns `None` when no existing node accepts. Ambiguity handling
/// follows [`MatchOptions::strict`] exactly as in [`match_bipartition`].
pub fn locate_bipartition(
    graph: &GraphHandle,
    bipartition: &Bipartition,
    seed: NodeId,
    options: &MatchOptions,
) -> Result<Option<NodeId>, MatchError> {
    let accepted = collect_matches(graph, bipartition, seed, options.kind)?;
    pick_lica(accepted, options.strict)
}

/// Matches a bipartition into the graph, extending annotations and
/// propagating the extension, or creating a fresh node when nothing
/// accepts.
///
/// Propagation completes before this returns, so the next bipartition in
/// a batch can rely on every set written here.
pub fn match_bipartition(
    graph: &mut GraphHandle,
    bipartition: &Bipartition,
    seed: NodeId,
    options: &MatchOptions,
) -> Result<MatchOutcome, MatchError> {
    let accepted = collect_matches(graph, bipartition, seed, options.kind)?;
    let (outcome, lica) = match pick_lica(accepted, options.strict)? {
        Some(lica) => (MatchOutcome::Matched(lica), lica),
        None => {
            // The fresh node's subtree is the seed's, so its ingroup must
            // cover the seed's ingroup as well as the bipartition's.
            let ingroup = bipartition.ingroup.union(graph.ingroup(seed)?);
            let fresh = graph.create_node();
            *graph.ingroup_mut(fresh)? = ingroup;
            graph.set_outgroup(fresh, bipartition.outgroup.clone())?;
            graph.create_edge(seed, fresh, options.kind)?;
            debug!(node = fresh.as_u64(), "no LICA found, created fresh node");
            (MatchOutcome::Created(fresh), fresh)
        }
    };

    // A matched taxonomy node already contains the whole ingroup and its
    // outgroup is implicit; there is nothing to extend or propagate.
    if !graph.has_outgroup(lica)? {
        return Ok(outcome);
    }

    let added_in = bipartition.ingroup.difference(graph.ingroup(lica)?);
    if !added_in.is_empty() {
        graph.ingroup_mut(lica)?.union_with(&bipartition.ingroup);
        debug!(node = lica.as_u64(), added = %added_in, "extended ingroup");
    }
    let added_out = match graph.outgroup(lica)? {
        Some(current) => bipartition.outgroup.difference(current),
        None => TaxonSet::new(),
    };
    if !added_out.is_empty() {
        graph.outgroup_mut(lica)?.union_with(&bipartition.outgroup);
        debug!(node = lica.as_u64(), added = %added_out, "extended outgroup");
    }

    // Ancestors and descendants are re-checked even when nothing was added
    // here: an earlier out-of-order merge can leave them behind.
    propagate_rootward(graph, bipartition, lica, options.kind)?;
    propagate_leafward(graph, bipartition, lica, options.kind)?;

    Ok(outcome)
}

fn collect_matches(
    graph: &GraphHandle,
    bipartition: &Bipartition,
    seed: NodeId,
    kind: RelKind,
) -> Result<Vec<NodeId>, StoreError> {
    // Surface a dangling seed as a store error rather than an empty walk.
    graph.ingroup(seed)?;
    Ok(traverse(graph, seed, kind, Direction::Rootward, |_, record| {
        classify(record, bipartition)
    })
    .collect())
}

fn pick_lica(accepted: Vec<NodeId>, strict: bool) -> Result<Option<NodeId>, MatchError> {
    match accepted.len() {
        0 => Ok(None),
        1 => Ok(Some(accepted[0])),
        _ if strict => Err(MatchError::AmbiguousLica { accepted }),
        _ => {
            warn!(
                first = accepted[0].as_u64(),
                count = accepted.len(),
                "multiple nodes accepted one bipartition, keeping the first"
            );
            Ok(Some(accepted[0]))
        }
    }
}

/// Pushes the LICA's (possibly just-extended) ingroup up to every
/// ancestor still missing some of it.
fn propagate_rootward(
    graph: &mut GraphHandle,
    bipartition: &Bipartition,
    lica: NodeId,
    kind: RelKind,
) -> Result<(), MatchError> {
    let lica_in = graph.ingroup(lica)?.clone();
    // Start from each parent rather than the LICA itself, which holds the
    // exact set and would end the walk immediately.
    let parents: Vec<NodeId> = graph.parents(lica, kind).collect();
    let mut stale = Vec::new();
    let mut seen = TaxonSet::new();
    for parent in parents {
        for id in missing_annotation_nodes(
            graph,
            parent,
            kind,
            Direction::Rootward,
            Annotation::Ingroup,
            &lica_in,
            false,
        ) {
            if seen.insert(id.as_u64()) {
                stale.push(id);
            }
        }
    }
    for ancestor in stale {
        let excluded = match graph.outgroup(ancestor)? {
            Some(outgroup) => outgroup.intersect(&bipartition.ingroup),
            None => TaxonSet::new(),
        };
        if !excluded.is_empty() {
            return Err(MatchError::Consistency(ConsistencyViolation {
                ancestor,
                descendant: lica,
                offending: excluded,
            }));
        }
        debug!(ancestor = ancestor.as_u64(), "updating ancestor with new ingroup ids");
        graph.ingroup_mut(ancestor)?.union_with(&lica_in);
    }
    Ok(())
}

/// Pushes the LICA's (possibly just-extended) outgroup down to every
/// synthesis-scope descendant still missing some of it.
fn propagate_leafward(
    graph: &mut GraphHandle,
    bipartition: &Bipartition,
    lica: NodeId,
    kind: RelKind,
) -> Result<(), MatchError> {
    let lica_out = match graph.outgroup(lica)? {
        Some(outgroup) => outgroup.clone(),
        None => return Ok(()),
    };
    let children: Vec<NodeId> = graph.children(lica, kind).collect();
    let mut stale = Vec::new();
    let mut seen = TaxonSet::new();
    for child in children {
        for id in missing_annotation_nodes(
            graph,
            child,
            kind,
            Direction::Leafward,
            Annotation::Outgroup,
            &lica_out,
            false,
        ) {
            if seen.insert(id.as_u64()) {
                stale.push(id);
            }
        }
    }
    for descendant in stale {
        let claimed = graph.ingroup(descendant)?.intersect(&bipartition.outgroup);
        if !claimed.is_empty() {
            return Err(MatchError::Consistency(ConsistencyViolation {
                ancestor: lica,
                descendant,
                offending: claimed,
            }));
        }
        debug!(
            descendant = descendant.as_u64(),
            "updating descendant with new outgroup ids"
        );
        graph.outgroup_mut(descendant)?.union_with(&lica_out);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(graph: &mut GraphHandle, name: &str, taxon: u64) -> NodeId {
        let id = graph.create_named_node(name);
        graph.ingroup_mut(id).unwrap().insert(taxon);
        id
    }

    fn scoped(graph: &mut GraphHandle, ingroup: &[u64], outgroup: &[u64]) -> NodeId {
        let id = graph.create_node();
        graph.ingroup_mut(id).unwrap().extend(ingroup.iter().copied());
        graph
            .set_outgroup(id, TaxonSet::from_ids(outgroup))
            .unwrap();
        id
    }

    /// root <- genus <- {species_a, species_b}, taxonomy only.
    fn taxonomy_chain() -> (GraphHandle, NodeId, NodeId, NodeId) {
        let mut graph = GraphHandle::new();
        let species_a = leaf(&mut graph, "species a", 1);
        let species_b = leaf(&mut graph, "species b", 2);
        let genus = graph.create_named_node("genus");
        graph.ingroup_mut(genus).unwrap().extend([1u64, 2]);
        let root = graph.create_named_node("root");
        graph.ingroup_mut(root).unwrap().extend([1u64, 2, 3]);
        graph
            .create_edge(species_a, genus, RelKind::SourceTree)
            .unwrap();
        graph
            .create_edge(species_b, genus, RelKind::SourceTree)
            .unwrap();
        graph.create_edge(genus, root, RelKind::SourceTree).unwrap();
        (graph, species_a, genus, root)
    }

    #[test]
    fn classify_is_pure_policy() {
        let mut graph = GraphHandle::new();
        let node = scoped(&mut graph, &[1, 2], &[9]);
        let record = graph.node(node).unwrap();

        // Overlapping ingroup, no vetoes: accept.
        let b = Bipartition::from_ids(&[2, 3], &[4]);
        assert_eq!(classify(record, &b), Decision::Stop);
        // Bipartition outgroup inside the node's ingroup: reject.
        let b = Bipartition::from_ids(&[3], &[1]);
        assert_eq!(classify(record, &b), Decision::Continue);
        // Node outgroup inside the bipartition ingroup: reject.
        let b = Bipartition::from_ids(&[9, 3], &[4]);
        assert_eq!(classify(record, &b), Decision::Continue);
        // Disjoint ingroups: not this path's ancestor, keep walking.
        let b = Bipartition::from_ids(&[7], &[4]);
        assert_eq!(classify(record, &b), Decision::Continue);
    }

    #[test]
    fn leaf_bipartition_matches_leaf_not_genus() {
        let (mut graph, species_a, _, _) = taxonomy_chain();
        let b = Bipartition::from_ids(&[1], &[2]);
        let outcome =
            match_bipartition(&mut graph, &b, species_a, &MatchOptions::default()).unwrap();
        assert_eq!(outcome, MatchOutcome::Matched(species_a));
    }

    #[test]
    fn sibling_pair_matches_genus() {
        let (mut graph, species_a, genus, _) = taxonomy_chain();
        let b = Bipartition::from_ids(&[1, 2], &[]);
        let outcome =
            match_bipartition(&mut graph, &b, species_a, &MatchOptions::default()).unwrap();
        assert_eq!(outcome, MatchOutcome::Matched(genus));
        // Matched taxonomy nodes are left untouched.
        assert!(graph.node(genus).unwrap().is_taxonomy());
        assert_eq!(graph.ingroup(genus).unwrap().to_sorted_vec(), vec![1, 2]);
    }

    #[test]
    fn match_extends_sets_and_updates_ancestors() {
        let mut graph = GraphHandle::new();
        let seed = leaf(&mut graph, "a", 1);
        let x = scoped(&mut graph, &[1], &[5]);
        let y = scoped(&mut graph, &[1, 3], &[]);
        graph.create_edge(seed, x, RelKind::SourceTree).unwrap();
        graph.create_edge(x, y, RelKind::SourceTree).unwrap();

        let b = Bipartition::from_ids(&[1, 2], &[6]);
        let outcome = match_bipartition(&mut graph, &b, seed, &MatchOptions::default()).unwrap();
        assert_eq!(outcome, MatchOutcome::Matched(x));

        assert_eq!(graph.ingroup(x).unwrap().to_sorted_vec(), vec![1, 2]);
        assert_eq!(
            graph.outgroup(x).unwrap().unwrap().to_sorted_vec(),
            vec![5, 6]
        );
        // Every strict ancestor now holds the new ingroup ids.
        assert_eq!(graph.ingroup(y).unwrap().to_sorted_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn contradicting_ancestor_is_fatal() {
        let mut graph = GraphHandle::new();
        let seed = leaf(&mut graph, "a", 1);
        let x = scoped(&mut graph, &[1], &[]);
        let y = scoped(&mut graph, &[1, 3], &[2]);
        graph.create_edge(seed, x, RelKind::SourceTree).unwrap();
        graph.create_edge(x, y, RelKind::SourceTree).unwrap();

        let b = Bipartition::from_ids(&[1, 2], &[]);
        let err = match_bipartition(&mut graph, &b, seed, &MatchOptions::default()).unwrap_err();
        match err {
            MatchError::Consistency(v) => {
                assert_eq!(v.ancestor, y);
                assert_eq!(v.descendant, x);
                assert_eq!(v.offending.to_sorted_vec(), vec![2]);
            }
            other => panic!("expected a consistency violation, got {other:?}"),
        }
    }

    #[test]
    fn outgroup_flows_down_to_descendants() {
        let mut graph = GraphHandle::new();
        // w is rejected for the bipartition (its outgroup claims taxon 2)
        // but sits below the LICA and must receive the new outgroup ids.
        let w = scoped(&mut graph, &[1], &[5, 2]);
        let x = scoped(&mut graph, &[1], &[5]);
        graph.create_edge(w, x, RelKind::SourceTree).unwrap();

        let b = Bipartition::from_ids(&[1, 2], &[6]);
        let outcome = match_bipartition(&mut graph, &b, w, &MatchOptions::default()).unwrap();
        assert_eq!(outcome, MatchOutcome::Matched(x));
        assert_eq!(
            graph.outgroup(w).unwrap().unwrap().to_sorted_vec(),
            vec![2, 5, 6]
        );
    }

    #[test]
    fn contradicting_descendant_is_fatal() {
        let mut graph = GraphHandle::new();
        let w = scoped(&mut graph, &[1, 6], &[5]);
        let x = scoped(&mut graph, &[1], &[5]);
        graph.create_edge(w, x, RelKind::SourceTree).unwrap();

        // Taxon 6 is in w's ingroup, and the merge would record it as
        // excluded at x above it.
        let b = Bipartition::from_ids(&[1, 2], &[6]);
        let err = match_bipartition(&mut graph, &b, w, &MatchOptions::default()).unwrap_err();
        match err {
            MatchError::Consistency(v) => {
                assert_eq!(v.ancestor, x);
                assert_eq!(v.descendant, w);
                assert_eq!(v.offending.to_sorted_vec(), vec![6]);
            }
            other => panic!("expected a consistency violation, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_bipartition_creates_a_node() {
        let mut graph = GraphHandle::new();
        let seed = leaf(&mut graph, "a", 1);
        let b = Bipartition::from_ids(&[1, 2], &[3]);
        let outcome = match_bipartition(&mut graph, &b, seed, &MatchOptions::default()).unwrap();
        let fresh = match outcome {
            MatchOutcome::Created(id) => id,
            other => panic!("expected creation, got {other:?}"),
        };
        assert_eq!(graph.ingroup(fresh).unwrap().to_sorted_vec(), vec![1, 2]);
        assert_eq!(
            graph.outgroup(fresh).unwrap().unwrap().to_sorted_vec(),
            vec![3]
        );
        assert_eq!(
            graph.parents(seed, RelKind::SourceTree).collect::<Vec<_>>(),
            vec![fresh]
        );
    }

    #[test]
    fn ambiguous_lica_keeps_first_or_fails_strict() {
        let mut graph = GraphHandle::new();
        let seed = leaf(&mut graph, "a", 1);
        let p1 = scoped(&mut graph, &[1], &[]);
        let p2 = scoped(&mut graph, &[1], &[]);
        graph.create_edge(seed, p1, RelKind::SourceTree).unwrap();
        graph.create_edge(seed, p2, RelKind::SourceTree).unwrap();

        let b = Bipartition::from_ids(&[1, 2], &[]);
        let outcome =
            match_bipartition(&mut graph, &b, seed, &MatchOptions::default()).unwrap();
        assert_eq!(outcome, MatchOutcome::Matched(p1));

        let strict = MatchOptions {
            strict: true,
            ..MatchOptions::default()
        };
        let err = match_bipartition(&mut graph, &b, seed, &strict).unwrap_err();
        match err {
            MatchError::AmbiguousLica { accepted } => {
                assert_eq!(accepted, vec![p1, p2]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn locate_does_not_mutate() {
        let mut graph = GraphHandle::new();
        let seed = leaf(&mut graph, "a", 1);
        let x = scoped(&mut graph, &[1], &[5]);
        graph.create_edge(seed, x, RelKind::SourceTree).unwrap();

        let b = Bipartition::from_ids(&[1, 2], &[6]);
        let found = locate_bipartition(&graph, &b, seed, &MatchOptions::default()).unwrap();
        assert_eq!(found, Some(x));
        assert_eq!(graph.ingroup(x).unwrap().to_sorted_vec(), vec![1]);
        assert_eq!(graph.outgroup(x).unwrap().unwrap().to_sorted_vec(), vec![5]);

        let nothing = Bipartition::from_ids(&[9], &[]);
        assert_eq!(
            locate_bipartition(&graph, &nothing, seed, &MatchOptions::default()).unwrap(),
            None
        );
    }

    #[test]
    fn missing_seed_is_a_store_error() {
        let mut graph = GraphHandle::new();
        let ghost = NodeId::new(42);
        let b = Bipartition::from_ids(&[1], &[]);
        let err = match_bipartition(&mut graph, &b, ghost, &MatchOptions::default()).unwrap_err();
        assert_eq!(err, MatchError::Store(StoreError::MissingNode(ghost)));
    }
}
