//! Rank-based conflict resolution.
//!
//! Where several source trees propose competing groupings over
//! overlapping leaf sets, the resolver selects a pairwise non-conflicting
//! subset of the proposed synthesis edges, preferring higher-priority
//! sources. Candidates are processed in descending rank and, within a
//! rank tier, in arrival order; this order is part of the observable
//! contract, since it decides ties.
//!
//! Two candidates conflict when the leaf sets they contribute intersect.
//! Strict mode rejects any conflicting candidate. Subsuming mode lets a
//! later candidate replace a single already-accepted candidate that it
//! wholly contains, provided the accepted candidate's node is reachable
//! from the new candidate's node through graph topology covering the
//! smaller leaf set; a candidate conflicting with two or more accepted
//! candidates is rejected either way.
//!
//! Taxon ids that end up inside two or more accepted candidates' full
//! leaf sets are reported as `duplicate_ids`: a genuine unresolved
//! duplication in the inputs, surfaced rather than silently collapsed.

use crate::graph::store::{GraphHandle, NodeId, RelKind, StoreError};
use crate::taxon_set::TaxonSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// A proposed synthesis edge competing for acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Caller-assigned identifier, unique within a batch.
    pub id: u64,
    /// The node the edge would hang below `parent`.
    pub child: NodeId,
    /// The node the edge points to.
    pub parent: NodeId,
    /// Source priority; a higher number wins conflicts.
    pub rank: u32,
    /// Groups alternative mappings of the same source-tree edge; at most
    /// one candidate per (rank, edge) group is accepted.
    pub edge: u32,
    /// The full leaf set below `child` in the merge scope.
    pub ingroup: TaxonSet,
    /// The leaf ids this mapping itself contributes, when narrower than
    /// `ingroup`. Conflicts are tested on the contribution; duplicates
    /// and subsumption on the full ingroup.
    pub contributed: Option<TaxonSet>,
}

impl Candidate {
    /// Creates a candidate whose contribution is its whole ingroup.
    pub fn new(
        id: u64,
        child: NodeId,
        parent: NodeId,
        rank: u32,
        edge: u32,
        ingroup: TaxonSet,
    ) -> Self {
        Self {
            id,
            child,
            parent,
            rank,
            edge,
            ingroup,
            contributed: None,
        }
    }

    /// Restricts the conflict-tested contribution to a narrower set.
    pub fn with_contribution(mut self, contributed: TaxonSet) -> Self {
        self.contributed = Some(contributed);
        self
    }

    /// The leaf set conflicts are tested on.
    #[inline]
    pub fn contribution(&self) -> &TaxonSet {
        self.contributed.as_ref().unwrap_or(&self.ingroup)
    }
}

/// Conflict-resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Any contribution overlap with an accepted candidate rejects.
    Strict,
    /// A candidate wholly containing a single conflicting accepted
    /// candidate, whose node it can reach, replaces it.
    Subsuming,
}

/// The outcome of one resolution batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Ids of accepted candidates, in acceptance order.
    pub accepted: Vec<u64>,
    /// Taxon ids present in two or more accepted ingroups.
    pub duplicate_ids: TaxonSet,
}

/// Error raised by a resolution batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Resolution was invoked with no candidates.
    EmptyCandidateSet,
    /// Two candidates subsume each other (identical ingroups); accepting
    /// either would let replacement loop.
    SubsumptionCycle {
        /// The already-accepted candidate's id.
        kept: u64,
        /// The incoming candidate's id.
        incoming: u64,
    },
    /// A reference into the store did not resolve.
    Store(StoreError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::EmptyCandidateSet => {
                write!(f, "conflict resolution invoked with no candidates")
            }
            ResolveError::SubsumptionCycle { kept, incoming } => write!(
                f,
                "candidates {} and {} subsume each other",
                kept, incoming
            ),
            ResolveError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<StoreError> for ResolveError {
    fn from(e: StoreError) -> Self {
        ResolveError::Store(e)
    }
}

/// Selects a non-conflicting, rank-preferring subset of `candidates`.
///
/// The graph is consulted only for subsumption reachability (along the
/// source-tree overlay); nothing is mutated.
pub fn resolve(
    graph: &GraphHandle,
    candidates: &[Candidate],
    mode: ResolutionMode,
) -> Result<Resolution, ResolveError> {
    if candidates.is_empty() {
        return Err(ResolveError::EmptyCandidateSet);
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    // Stable sort: arrival order is preserved within a rank tier.
    order.sort_by_key(|&i| std::cmp::Reverse(candidates[i].rank));

    let mut accepted: Vec<usize> = Vec::new();
    let mut taken_groups: HashSet<(u32, u32)> = HashSet::new();

    for i in order {
        let candidate = &candidates[i];
        if taken_groups.contains(&(candidate.rank, candidate.edge)) {
            debug!(
                candidate = candidate.id,
                "an alternative mapping of this edge was already accepted"
            );
            continue;
        }

        let conflicts: Vec<usize> = accepted
            .iter()
            .copied()
            .filter(|&j| candidates[j].contribution().contains_any(candidate.contribution()))
            .collect();

        let accept = match (mode, conflicts.len()) {
            (_, 0) => true,
            (ResolutionMode::Strict, _) => {
                debug!(
                    candidate = candidate.id,
                    offending = candidates[conflicts[0]].id,
                    "conflict found, candidate will not be added"
                );
                false
            }
            (ResolutionMode::Subsuming, 1) => {
                let prev = &candidates[conflicts[0]];
                if candidate.ingroup.contains_all(&prev.ingroup) {
                    if prev.ingroup.contains_all(&candidate.ingroup) {
                        return Err(ResolveError::SubsumptionCycle {
                            kept: prev.id,
                            incoming: candidate.id,
                        });
                    }
                    if covered_path_exists(graph, candidate.child, prev.child, &prev.ingroup)? {
                        debug!(
                            candidate = candidate.id,
                            replaced = prev.id,
                            "candidate subsumes an accepted candidate, replacing it"
                        );
                        let j = conflicts[0];
                        accepted.retain(|&k| k != j);
                        true
                    } else {
                        debug!(
                            candidate = candidate.id,
                            offending = prev.id,
                            "contains the conflicting candidate but cannot reach it"
                        );
                        false
                    }
                } else {
                    debug!(
                        candidate = candidate.id,
                        offending = prev.id,
                        "conflicts without subsuming, candidate will not be added"
                    );
                    false
                }
            }
            (ResolutionMode::Subsuming, n) => {
                warn!(
                    candidate = candidate.id,
                    conflicts = n,
                    "candidate conflicts with several accepted candidates, rejecting"
                );
                false
            }
        };

        if accept {
            debug!(candidate = candidate.id, "candidate accepted");
            accepted.push(i);
            taken_groups.insert((candidate.rank, candidate.edge));
        }
    }

    let mut encountered = TaxonSet::new();
    let mut duplicate_ids = TaxonSet::new();
    for &i in &accepted {
        for id in candidates[i].ingroup.iter() {
            if !encountered.insert(id) {
                duplicate_ids.insert(id);
            }
        }
    }
    if !duplicate_ids.is_empty() {
        warn!(duplicates = %duplicate_ids, "taxa appear under several accepted candidates");
    }

    Ok(Resolution {
        accepted: accepted.iter().map(|&i| candidates[i].id).collect(),
        duplicate_ids,
    })
}

/// Tests whether `target` is reachable leafward from `from` along the
/// source-tree overlay, entering only nodes whose ingroup covers `scope`.
fn covered_path_exists(
    graph: &GraphHandle,
    from: NodeId,
    target: NodeId,
    scope: &TaxonSet,
) -> Result<bool, StoreError> {
    if from == target {
        return Ok(true);
    }
    let mut seen = TaxonSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.as_u64()) {
            continue;
        }
        for child in graph.children(node, RelKind::SourceTree) {
            if child == target {
                return Ok(true);
            }
            if graph.ingroup(child)?.contains_all(scope) {
                stack.push(child);
            }
        }
    }
    Ok(false)
}
