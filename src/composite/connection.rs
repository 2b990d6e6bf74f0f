//! Candidate parent edges between composite branches.

use crate::composite::BranchIndex;
use crate::model::ReconstructionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Index of a connection in the composite's connection arena.
pub type ConnectionIndex = usize;

// =#========================================================================#=
// BRANCH END
// =#========================================================================#=
/// One of the two ends of a branch's segment.
///
/// Ends are expressed in the branch's *original* marker order: `Top` is the
/// first marker and `Bottom` the last marker as the segment was ingested,
/// regardless of later flips (see
/// [is_reversed](crate::composite::CompositeBranch::is_reversed)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BranchEnd {
    Top,
    Bottom,
}

impl BranchEnd {
    /// Returns the other end.
    pub fn opposite(self) -> Self {
        match self {
            BranchEnd::Top => BranchEnd::Bottom,
            BranchEnd::Bottom => BranchEnd::Top,
        }
    }
}

// =#========================================================================#=
// CONNECTION
// =#========================================================================#=
/// A directed, confidence-weighted candidate edge from a child branch to a
/// parent branch.
///
/// `parent == None` marks the child as a candidate root. Root connections
/// always carry `parent_end == Top`, so that two root votes for the same
/// child end are recognized as the same edge.
///
/// # Invariants
/// - `confidence` is the sum of the vote weights of all contributing reconstructions
/// - `(parent, parent_end, child_end)` is unique among the child's connections
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    child: BranchIndex,
    child_end: BranchEnd,
    parent: Option<BranchIndex>,
    parent_end: BranchEnd,
    reconstructions: BTreeSet<ReconstructionId>,
    confidence: f64,
}

impl Connection {
    /// Creates a connection proposed by a single reconstruction.
    ///
    /// # Arguments
    /// * `child` - Branch looking for a parent
    /// * `child_end` - End of the child touching the parent
    /// * `parent` - Candidate parent branch
    /// * `parent_end` - End of the parent the child touches
    /// * `reconstruction` - Reconstruction voting for this edge
    /// * `confidence` - Weight of the vote
    pub fn new(
        child: BranchIndex,
        child_end: BranchEnd,
        parent: BranchIndex,
        parent_end: BranchEnd,
        reconstruction: ReconstructionId,
        confidence: f64,
    ) -> Self {
        Connection {
            child,
            child_end,
            parent: Some(parent),
            parent_end,
            reconstructions: BTreeSet::from([reconstruction]),
            confidence,
        }
    }

    /// Creates a root connection: `child` proposed as root, entered at `child_end`.
    pub fn root(
        child: BranchIndex,
        child_end: BranchEnd,
        reconstruction: ReconstructionId,
        confidence: f64,
    ) -> Self {
        Connection {
            child,
            child_end,
            parent: None,
            parent_end: BranchEnd::Top,
            reconstructions: BTreeSet::from([reconstruction]),
            confidence,
        }
    }

    pub fn child(&self) -> BranchIndex {
        self.child
    }

    pub fn child_end(&self) -> BranchEnd {
        self.child_end
    }

    pub fn parent(&self) -> Option<BranchIndex> {
        self.parent
    }

    pub fn parent_end(&self) -> BranchEnd {
        self.parent_end
    }

    /// Returns `true` for a root candidate.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the reconstructions that voted for this edge.
    pub fn reconstructions(&self) -> &BTreeSet<ReconstructionId> {
        &self.reconstructions
    }

    /// Returns the accumulated confidence.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Returns `true` if `other` describes the same edge for the same child.
    pub(crate) fn same_edge(&self, other: &Connection) -> bool {
        self.child == other.child
            && self.parent == other.parent
            && self.parent_end == other.parent_end
            && self.child_end == other.child_end
    }

    /// Adds the evidence of `other` to this connection.
    pub(crate) fn absorb(&mut self, other: &Connection) {
        self.confidence += other.confidence;
        self.reconstructions.extend(other.reconstructions.iter().copied());
    }

    pub(crate) fn set_child(&mut self, child: BranchIndex) {
        self.child = child;
    }

    pub(crate) fn set_parent(&mut self, parent: BranchIndex) {
        self.parent = Some(parent);
    }
}
