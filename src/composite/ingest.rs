//! Merging reconstructions into a composite.
//!
//! The first reconstruction seeds the composite one branch per segment.
//! Every later reconstruction is merged through the verdicts of an external
//! matcher, given as [SegmentCorrespondence]s:
//!
//! ```text
//! Reconstruction ──→ BranchMatcher ──→ [SegmentCorrespondence] ──→ add_reconstruction
//!                                                                   ├─ matches / misses
//!                                                                   ├─ new branches
//!                                                                   └─ connections
//! ```
//!
//! The matcher itself is outside this crate; implement [BranchMatcher] to
//! plug one in, or call [Composite::add_reconstruction] with precomputed
//! correspondences.

use crate::composite::branch::{BranchMatch, CompositeBranch};
use crate::composite::connection::{BranchEnd, Connection};
use crate::composite::graph::{check_confidence, BranchIndex, Composite, ReconstructionInfo};
use crate::error::{Error, Result};
use crate::model::{Reconstruction, SegmentIndex};
use tracing::{debug, info};

// =#========================================================================#=
// MATCHER INTERFACE
// =#========================================================================#=
/// Verdict that a reconstruction segment is a composite branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentCorrespondence {
    /// Segment of the reconstruction being merged
    pub segment: SegmentIndex,
    /// Branch of the composite it corresponds to
    pub branch: BranchIndex,
    /// Whether the segment's marker order runs along the branch's original order
    pub forward: bool,
    /// Match score; scales the reconstruction's vote weight
    pub confidence: f64,
}

impl SegmentCorrespondence {
    /// Creates a forward correspondence with full confidence.
    pub fn new(segment: SegmentIndex, branch: BranchIndex) -> Self {
        SegmentCorrespondence {
            segment,
            branch,
            forward: true,
            confidence: 1.0,
        }
    }

    /// Marks the correspondence as reversed.
    pub fn reversed(mut self) -> Self {
        self.forward = false;
        self
    }

    /// Sets the match score.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Abstraction for the branch matching step.
///
/// Given the current composite and a new reconstruction, a matcher decides
/// which reconstruction segments correspond to which composite branches.
/// Each segment and each branch may appear in at most one correspondence.
/// Segments left out become new branches; branches left out count as missed
/// by this reconstruction.
pub trait BranchMatcher {
    fn match_reconstruction(
        &mut self,
        composite: &Composite,
        reconstruction: &Reconstruction,
    ) -> Vec<SegmentCorrespondence>;
}

// ============================================================================
// Ingestion (pub)
// ============================================================================
impl Composite {
    /// Seeds an empty composite with its first reconstruction.
    ///
    /// Walks the tree depth-first with an explicit stack, creating one branch
    /// per segment (a copy of its markers), recording a forward match and the
    /// root/parent connection of each, and mirroring the tree as the
    /// resolved tree.
    ///
    /// # Errors
    /// * [Error::AlreadyInitialized] - composite holds a reconstruction already
    /// * [Error::EmptyReconstruction] - tree has no root
    /// * [Error::InvalidTree] - tree fails [is_valid](crate::model::SegmentTree::is_valid)
    /// * [Error::SegmentTooShort] - a segment has no markers
    pub fn add_first_reconstruction(&mut self, reconstruction: &Reconstruction) -> Result<()> {
        if !self.reconstructions.is_empty() {
            return Err(Error::AlreadyInitialized(self.reconstructions.len()));
        }
        let id = reconstruction.id();
        let tree = reconstruction.tree();
        let root = tree.root_index().ok_or(Error::EmptyReconstruction(id))?;
        check_tree(reconstruction)?;
        let weight = reconstruction.confidence();

        self.register(reconstruction);

        let mut stack: Vec<(SegmentIndex, Option<BranchIndex>)> = vec![(root, None)];
        while let Some((index, parent)) = stack.pop() {
            let segment = &tree[index];
            let branch = self.push_branch(CompositeBranch::new(segment.detached_copy()));
            self.segment_lookup.insert((id, index), branch);
            self.add_branch_match(branch, BranchMatch::whole(id, index, segment.len(), true, weight))?;

            let connection = match parent {
                Some(parent) => {
                    self.add_child(parent, branch);
                    Connection::new(branch, BranchEnd::Top, parent, BranchEnd::Bottom, id, weight)
                }
                None => {
                    self.root = Some(branch);
                    Connection::root(branch, BranchEnd::Top, id, weight)
                }
            };
            let connection = self.add_connection(connection)?;
            self.branches[branch].resolved_connection = Some(connection);

            // Reversed, so the first child gets the next branch index
            for &child in segment.children().iter().rev() {
                stack.push((child, Some(branch)));
            }
        }

        info!(reconstruction = id, branches = self.branches.len(), "seeded composite");
        Ok(())
    }

    /// Merges a further reconstruction using precomputed correspondences.
    ///
    /// * Matched branches get a match weighted by
    ///   `reconstruction.confidence * correspondence.confidence`.
    /// * Unmatched branches get a miss weighted by `reconstruction.confidence`.
    /// * Unmatched segments reachable from the root become new branches, with
    ///   one miss per earlier reconstruction.
    /// * Every reachable segment adds a connection to its parent's branch
    ///   (or a root connection), with ends derived from the match directions.
    ///
    /// # Errors
    /// * [Error::NoReconstructions] - composite was not seeded yet
    /// * [Error::DuplicateReconstruction] - id already merged
    /// * [Error::EmptyReconstruction] - tree has no root
    /// * [Error::InvalidTree] - tree fails [is_valid](crate::model::SegmentTree::is_valid)
    /// * [Error::UnknownSegment] / [Error::UnknownBranch] - index out of bounds
    /// * [Error::DuplicateCorrespondence] - segment or branch named twice
    /// * [Error::InvalidConfidence] - non-positive match score
    pub fn add_reconstruction(
        &mut self,
        reconstruction: &Reconstruction,
        correspondences: &[SegmentCorrespondence],
    ) -> Result<()> {
        if self.reconstructions.is_empty() {
            return Err(Error::NoReconstructions);
        }
        let id = reconstruction.id();
        if self.reconstructions.iter().any(|r| r.id == id) {
            return Err(Error::DuplicateReconstruction(id));
        }
        let tree = reconstruction.tree();
        let root = tree.root_index().ok_or(Error::EmptyReconstruction(id))?;
        check_tree(reconstruction)?;

        // Validate everything before mutating
        let num_existing = self.branches.len();
        let mut segment_branch: Vec<Option<(BranchIndex, bool)>> = vec![None; tree.num_segments()];
        let mut branch_matched = vec![false; num_existing];
        for c in correspondences {
            if c.segment >= tree.num_segments() {
                return Err(Error::UnknownSegment {
                    reconstruction: id,
                    segment: c.segment,
                });
            }
            if c.branch >= num_existing {
                return Err(Error::UnknownBranch(c.branch));
            }
            if segment_branch[c.segment].is_some() || branch_matched[c.branch] {
                return Err(Error::DuplicateCorrespondence {
                    segment: c.segment,
                    branch: c.branch,
                });
            }
            check_confidence(c.confidence)?;
            segment_branch[c.segment] = Some((c.branch, c.forward));
            branch_matched[c.branch] = true;
        }

        let weight = reconstruction.confidence();
        let prior_weight = self.total_reconstruction_confidence();
        self.register(reconstruction);

        // Positive and negative evidence on existing branches
        for c in correspondences {
            let len = tree[c.segment].len();
            let branch_match = BranchMatch::whole(id, c.segment, len, c.forward, weight * c.confidence);
            self.add_branch_match(c.branch, branch_match)?;
            self.segment_lookup.insert((id, c.segment), c.branch);
        }
        for branch in (0..num_existing).filter(|&b| !branch_matched[b]) {
            self.add_branch_miss(branch, weight)?;
        }

        // New branches for unmatched segments
        let order: Vec<SegmentIndex> = tree.pre_order_iter().map(|(index, _)| index).collect();
        let mut created = 0;
        for &index in &order {
            if segment_branch[index].is_some() {
                continue;
            }
            let segment = &tree[index];
            let branch = self.push_branch(CompositeBranch::new(segment.detached_copy()));
            self.add_branch_match(branch, BranchMatch::whole(id, index, segment.len(), true, weight))?;
            if prior_weight > 0.0 {
                self.add_branch_miss(branch, prior_weight)?;
            }
            self.segment_lookup.insert((id, index), branch);
            segment_branch[index] = Some((branch, true));
            created += 1;
        }

        // Structural votes
        for &index in &order {
            let Some((branch, forward)) = segment_branch[index] else {
                continue;
            };
            let child_end = if forward { BranchEnd::Top } else { BranchEnd::Bottom };

            let connection = if index == root {
                Connection::root(branch, child_end, id, weight)
            } else {
                let Some((parent, parent_forward)) = tree[index].parent().and_then(|p| segment_branch[p])
                else {
                    continue;
                };
                let parent_end = if parent_forward { BranchEnd::Bottom } else { BranchEnd::Top };
                Connection::new(branch, child_end, parent, parent_end, id, weight)
            };
            self.add_connection(connection)?;
        }

        debug!(
            reconstruction = id,
            matched = correspondences.len(),
            created,
            "merged reconstruction"
        );
        Ok(())
    }

    /// Merges a reconstruction, computing correspondences with `matcher`.
    ///
    /// An empty composite is seeded instead; the matcher is not consulted.
    pub fn incorporate<M: BranchMatcher + ?Sized>(
        &mut self,
        reconstruction: &Reconstruction,
        matcher: &mut M,
    ) -> Result<()> {
        if self.reconstructions.is_empty() {
            return self.add_first_reconstruction(reconstruction);
        }
        let correspondences = matcher.match_reconstruction(self, reconstruction);
        self.add_reconstruction(reconstruction, &correspondences)
    }

    fn register(&mut self, reconstruction: &Reconstruction) {
        self.reconstructions.push(ReconstructionInfo {
            id: reconstruction.id(),
            name: reconstruction.name().map(str::to_string),
            confidence: reconstruction.confidence(),
        });
    }
}

/// Rejects malformed trees and segments without markers.
///
/// Trees built through `SegmentTree::add_child` are always valid; deserialized
/// ones may carry dangling or cyclic links that would derail the ingestion walk.
fn check_tree(reconstruction: &Reconstruction) -> Result<()> {
    let tree = reconstruction.tree();
    if !tree.is_valid() {
        return Err(Error::InvalidTree(reconstruction.id()));
    }
    match tree.segments().iter().find(|s| s.is_empty()) {
        Some(_) => Err(Error::SegmentTooShort { len: 0, required: 1 }),
        None => Ok(()),
    }
}
