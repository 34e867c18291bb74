//! Cladograph: merging phylogenetic hypotheses into a synthetic tree.
//!
//! This crate merges many independently-rooted phylogenetic trees, each
//! expressing hypotheses about which taxa are nested together, into one
//! acyclic synthetic tree held in a shared graph. Each source tree is
//! reduced (upstream of this crate) to a sequence of bipartitions — an
//! ingroup of taxa below one edge and an outgroup of taxa that edge
//! excludes — ordered by source priority. For every bipartition the crate
//! finds or creates the least inclusive common ancestor (LICA) in the
//! graph, keeps the cached per-node taxon sets consistent as the graph is
//! mutated, and deterministically picks a non-conflicting subset when
//! several sources compete over the same taxa.
//!
//! # Components
//!
//! - [`taxon_set::TaxonSet`]: compact integer-id sets backing every
//!   annotation, with fast containment tests.
//! - [`graph`]: the in-memory graph store ([`graph::GraphHandle`]) with
//!   ingroup/outgroup set properties per node, typed child-to-parent
//!   overlays, and a lazy decision-driven traversal.
//! - [`matcher`]: bipartition-to-graph matching, annotation extension,
//!   and rootward/leafward propagation of new ids.
//! - [`validator`]: lazy sweeps detecting nodes whose cached sets have
//!   gone stale relative to their children.
//! - [`sinker`]: bottom-up repair reattaching children of nodes whose
//!   recorded scope their subtrees no longer cover.
//! - [`resolver`]: rank-preferring conflict resolution over proposed
//!   synthesis edges, strict or subsuming.
//!
//! Merging is strictly sequential in source rank order; later merges rely
//! on the annotations earlier merges wrote. There is no process-wide
//! state: every operation takes the graph handle explicitly.
//!
//! # Example
//!
//! ```
//! use cladograph::prelude::*;
//!
//! let mut graph = GraphHandle::new();
//! let heron = graph.create_named_node("heron");
//! let stork = graph.create_named_node("stork");
//! graph.ingroup_mut(heron).unwrap().insert(heron.as_u64());
//! graph.ingroup_mut(stork).unwrap().insert(stork.as_u64());
//!
//! // One source tree claims heron and stork nest together.
//! let split = Bipartition::new(
//!     TaxonSet::from_ids(&[heron.as_u64(), stork.as_u64()]),
//!     TaxonSet::new(),
//! );
//! let outcome =
//!     match_bipartition(&mut graph, &split, heron, &MatchOptions::default()).unwrap();
//! let lica = outcome.node();
//! assert!(graph.ingroup(lica).unwrap().contains(stork.as_u64()));
//! ```

pub mod bipartition;
pub mod graph;
pub mod matcher;
pub mod resolver;
pub mod sinker;
pub mod taxon_set;
pub mod validator;

pub use bipartition::Bipartition;
pub use graph::{Decision, Direction, EdgeId, GraphHandle, NodeId, RelKind, StoreError};
pub use matcher::{
    classify, locate_bipartition, match_bipartition, ConsistencyViolation, MatchError,
    MatchOptions, MatchOutcome,
};
pub use resolver::{resolve, Candidate, Resolution, ResolutionMode, ResolveError};
pub use sinker::{repair, RepairError, RepairReport};
pub use taxon_set::TaxonSet;
pub use validator::{missing_annotation_nodes, stale_nodes, Annotation};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::bipartition::Bipartition;
    pub use crate::graph::{
        traverse, Decision, Direction, EdgeId, GraphHandle, NodeId, RelKind, StoreError,
    };
    pub use crate::matcher::{
        locate_bipartition, match_bipartition, MatchError, MatchOptions, MatchOutcome,
    };
    pub use crate::resolver::{resolve, Candidate, Resolution, ResolutionMode, ResolveError};
    pub use crate::sinker::{repair, RepairError, RepairReport};
    pub use crate::taxon_set::TaxonSet;
    pub use crate::validator::{stale_nodes, Annotation};
}
