//! Bipartitions contributed by source trees.
//!
//! Each internal edge of a rooted source tree splits that tree's mapped
//! leaves in two: the taxa reachable below the edge (the ingroup) and the
//! taxa known at import time to be excluded from that subtree (the
//! outgroup). The outgroup is not necessarily the full complement of the
//! ingroup; it only names what the source tree itself witnessed.

use crate::taxon_set::TaxonSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One source-tree edge's (ingroup, outgroup) contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bipartition {
    /// Taxon ids below the source-tree edge.
    pub ingroup: TaxonSet,
    /// Taxon ids the source tree places outside the edge's subtree.
    pub outgroup: TaxonSet,
}

impl Bipartition {
    /// Creates a bipartition from its two halves.
    pub fn new(ingroup: TaxonSet, outgroup: TaxonSet) -> Self {
        Self { ingroup, outgroup }
    }

    /// Creates a bipartition from id slices.
    pub fn from_ids(ingroup: &[u64], outgroup: &[u64]) -> Self {
        Self {
            ingroup: TaxonSet::from_ids(ingroup),
            outgroup: TaxonSet::from_ids(outgroup),
        }
    }

    /// Returns `true` if the two halves share no taxon.
    ///
    /// A well-formed bipartition is always internally disjoint; overlap
    /// indicates a broken exemplar mapping upstream.
    pub fn is_internally_disjoint(&self) -> bool {
        !self.ingroup.contains_any(&self.outgroup)
    }
}

impl fmt::Display for Bipartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.ingroup, self.outgroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjointness() {
        let good = Bipartition::from_ids(&[1, 2], &[3]);
        assert!(good.is_internally_disjoint());
        let bad = Bipartition::from_ids(&[1, 2], &[2, 3]);
        assert!(!bad.is_internally_disjoint());
        // An edge with no witnessed outgroup is fine.
        let open = Bipartition::from_ids(&[1, 2], &[]);
        assert!(open.is_internally_disjoint());
    }

    #[test]
    fn display_shows_both_halves() {
        let bipart = Bipartition::from_ids(&[2, 1], &[5]);
        assert_eq!(bipart.to_string(), "{1, 2} | {5}");
    }
}
