//! The composite: arena of branches and connections, and the structural
//! operations on it (connection bookkeeping, resolved-tree links, splitting,
//! deep copy).

use crate::composite::branch::{BranchMatch, CompositeBranch};
use crate::composite::connection::{Connection, ConnectionIndex};
use crate::error::{Error, Result};
use crate::model::{ReconstructionId, Segment, SegmentIndex};
use std::collections::HashMap;
use tracing::debug;

/// Index of a branch in the composite (arena).
pub type BranchIndex = usize;

/// *During copying only*, marker for a connection not referenced by any branch.
const NO_CONNECTION: ConnectionIndex = usize::MAX;

/// Registration record of a reconstruction merged into a composite.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionInfo {
    pub id: ReconstructionId,
    pub name: Option<String>,
    pub confidence: f64,
}

// =$========================================================================$=
// COMPOSITE
// =$========================================================================$=
/// Best-estimate tree merged from several reconstructions.
///
/// Branches and connections live in two arenas and refer to each other only
/// by [BranchIndex] and [ConnectionIndex]. Branches are never removed from
/// the arena; a branch that is not part of the resolved tree simply has no
/// parent and no children. Connections are detached (not deleted) when
/// removed, and dropped from the arena by [copy](Composite::copy).
///
/// # Resolved-tree invariants
/// - At most one branch is the root; it has no parent
/// - `child ∈ parent.children ⇔ child.parent == parent`
/// - No branch is its own ancestor
///
/// See [validate_tree](Composite::validate_tree).
#[derive(Debug, Default)]
pub struct Composite {
    pub(crate) branches: Vec<CompositeBranch>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) root: Option<BranchIndex>,
    pub(crate) reconstructions: Vec<ReconstructionInfo>,
    /// (reconstruction, segment) to the branch it was matched to or created as
    pub(crate) segment_lookup: HashMap<(ReconstructionId, SegmentIndex), BranchIndex>,
}

// ============================================================================
// New, Getters / Accessors (pub)
// ============================================================================
impl Composite {
    /// Creates an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all branches, connections and reconstructions.
    pub fn clear(&mut self) {
        *self = Composite::new();
    }

    /// Returns the number of branches in the arena.
    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// Returns the branch at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn branch(&self, index: BranchIndex) -> &CompositeBranch {
        &self.branches[index]
    }

    /// Returns the branch at `index`, or `None` if out of bounds.
    pub fn get_branch(&self, index: BranchIndex) -> Option<&CompositeBranch> {
        self.branches.get(index)
    }

    /// Returns all branches in arena order.
    pub fn branches(&self) -> &[CompositeBranch] {
        &self.branches
    }

    /// Returns the connection at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn connection(&self, index: ConnectionIndex) -> &Connection {
        &self.connections[index]
    }

    /// Returns the root of the resolved tree, if any.
    pub fn root(&self) -> Option<BranchIndex> {
        self.root
    }

    /// Returns the segment of the root branch, if any.
    pub fn root_segment(&self) -> Option<&Segment> {
        self.root.map(|r| &self.branches[r].segment)
    }

    /// Returns the merged reconstructions in ingestion order.
    pub fn reconstructions(&self) -> &[ReconstructionInfo] {
        &self.reconstructions
    }

    /// Returns the registration record of reconstruction `id`.
    ///
    /// # Errors
    /// [Error::UnknownReconstruction] if `id` was never merged.
    pub fn reconstruction(&self, id: ReconstructionId) -> Result<&ReconstructionInfo> {
        self.reconstructions
            .iter()
            .find(|r| r.id == id)
            .ok_or(Error::UnknownReconstruction(id))
    }

    /// Returns the number of merged reconstructions.
    pub fn num_reconstructions(&self) -> usize {
        self.reconstructions.len()
    }

    /// Returns the summed vote weight of all merged reconstructions.
    pub fn total_reconstruction_confidence(&self) -> f64 {
        self.reconstructions.iter().map(|r| r.confidence).sum()
    }

    /// Returns the branch a reconstruction segment was matched to or created as.
    pub fn branch_for_segment(
        &self,
        reconstruction: ReconstructionId,
        segment: SegmentIndex,
    ) -> Option<BranchIndex> {
        self.segment_lookup.get(&(reconstruction, segment)).copied()
    }

    fn check_branch(&self, index: BranchIndex) -> Result<()> {
        if index < self.branches.len() {
            Ok(())
        } else {
            Err(Error::UnknownBranch(index))
        }
    }
}

// ============================================================================
// Evidence and connection bookkeeping (pub)
// ============================================================================
impl Composite {
    /// Records that a reconstruction branch was matched to `branch`.
    ///
    /// Increments both the summed confidence and the denominator by the
    /// match's confidence.
    ///
    /// # Errors
    /// [Error::UnknownBranch] or [Error::InvalidConfidence].
    pub fn add_branch_match(&mut self, branch: BranchIndex, branch_match: BranchMatch) -> Result<()> {
        self.check_branch(branch)?;
        check_confidence(branch_match.confidence)?;
        self.branches[branch].add_branch_match(branch_match);
        Ok(())
    }

    /// Records that a reconstruction considered `branch` but has no match for it.
    ///
    /// Only the denominator grows, so the branch's confidence drops.
    ///
    /// # Errors
    /// [Error::UnknownBranch] or [Error::InvalidConfidence].
    pub fn add_branch_miss(&mut self, branch: BranchIndex, confidence: f64) -> Result<()> {
        self.check_branch(branch)?;
        check_confidence(confidence)?;
        self.branches[branch].add_branch_miss(confidence);
        Ok(())
    }

    /// Adds a candidate parent connection to its child branch.
    ///
    /// If the child already holds a connection with the same
    /// `(parent, parent_end, child_end)`, that one absorbs the new evidence
    /// and its index is returned; otherwise the connection is inserted and
    /// registered in the parent's child-connection index.
    ///
    /// # Errors
    /// [Error::UnknownBranch] for a missing child/parent,
    /// [Error::SelfConnection] for a connection from a branch to itself,
    /// [Error::InvalidConfidence] for a non-positive weight.
    pub fn add_connection(&mut self, connection: Connection) -> Result<ConnectionIndex> {
        let child = connection.child();
        self.check_branch(child)?;
        if let Some(parent) = connection.parent() {
            self.check_branch(parent)?;
            if parent == child {
                return Err(Error::SelfConnection(parent));
            }
        }
        check_confidence(connection.confidence())?;

        let existing = self.branches[child]
            .parent_connections
            .iter()
            .copied()
            .find(|&c| self.connections[c].same_edge(&connection));

        let index = match existing {
            Some(index) => {
                self.connections[index].absorb(&connection);
                index
            }
            None => {
                let index = self.connections.len();
                if let Some(parent) = connection.parent() {
                    self.branches[parent]
                        .child_connections_mut(connection.parent_end())
                        .push(index);
                }
                self.branches[child].parent_connections.push(index);
                self.connections.push(connection.clone());
                index
            }
        };

        let branch = &mut self.branches[child];
        branch.combined_connection_weight += connection.confidence();
        let improves = branch
            .best_connection
            .is_none_or(|best| self.connections[index].confidence() > self.connections[best].confidence());
        if improves {
            branch.best_connection = Some(index);
        }

        Ok(index)
    }

    /// Detaches a connection from its child and from its parent's index.
    ///
    /// If it was the child's best connection, the next-highest is selected.
    /// If it was the child's resolved connection, that is cleared.
    ///
    /// # Returns
    /// `false` if the connection was not attached.
    pub fn remove_connection(&mut self, index: ConnectionIndex) -> bool {
        let Some(connection) = self.connections.get(index) else {
            return false;
        };
        let (child, parent, parent_end, confidence) = (
            connection.child(),
            connection.parent(),
            connection.parent_end(),
            connection.confidence(),
        );

        let branch = &mut self.branches[child];
        let Some(pos) = branch.parent_connections.iter().position(|&c| c == index) else {
            return false;
        };
        branch.parent_connections.remove(pos);
        branch.combined_connection_weight -= confidence;
        if branch.parent_connections.is_empty() {
            branch.combined_connection_weight = 0.0;
        }

        if let Some(parent) = parent {
            self.branches[parent]
                .child_connections_mut(parent_end)
                .retain(|&c| c != index);
        }

        if self.branches[child].best_connection == Some(index) {
            self.branches[child].best_connection = self.scan_best_connection(child);
        }
        if self.branches[child].resolved_connection == Some(index) {
            self.branches[child].resolved_connection = None;
        }

        true
    }

    /// Returns the highest-confidence connection of `branch`; ties go to
    /// the earliest inserted.
    fn scan_best_connection(&self, branch: BranchIndex) -> Option<ConnectionIndex> {
        let mut best: Option<ConnectionIndex> = None;
        for &c in &self.branches[branch].parent_connections {
            if best.is_none_or(|b| self.connections[c].confidence() > self.connections[b].confidence()) {
                best = Some(c);
            }
        }
        best
    }

    /// Detaches `index`, rewires its ends, and re-inserts it.
    ///
    /// A connection that was its child's resolved connection stays resolved
    /// on the (possibly new) child.
    fn move_connection(&mut self, index: ConnectionIndex, rewire: impl FnOnce(&mut Connection)) {
        let resolved = self.branches[self.connections[index].child()].resolved_connection == Some(index);
        self.remove_connection(index);
        rewire(&mut self.connections[index]);
        self.reattach_connection(index);
        if resolved {
            let child = self.connections[index].child();
            self.branches[child].resolved_connection = Some(index);
        }
    }

    /// Re-inserts a detached connection without merging.
    fn reattach_connection(&mut self, index: ConnectionIndex) {
        let connection = &self.connections[index];
        let (child, parent, parent_end, confidence) = (
            connection.child(),
            connection.parent(),
            connection.parent_end(),
            connection.confidence(),
        );

        if let Some(parent) = parent {
            self.branches[parent].child_connections_mut(parent_end).push(index);
        }
        let branch = &mut self.branches[child];
        branch.parent_connections.push(index);
        branch.combined_connection_weight += confidence;
        let improves = branch
            .best_connection
            .is_none_or(|best| confidence > self.connections[best].confidence());
        if improves {
            branch.best_connection = Some(index);
        }
    }
}

// ============================================================================
// Resolved tree links (crate)
// ============================================================================
impl Composite {
    /// Makes `child` a resolved child of `parent`, keeping both sides in sync.
    pub(crate) fn add_child(&mut self, parent: BranchIndex, child: BranchIndex) {
        debug_assert_ne!(parent, child);
        if let Some(old) = self.branches[child].segment.parent() {
            self.branches[old].segment.remove_child(child);
        }
        self.branches[parent].segment.add_child(child);
        self.branches[child].segment.set_parent(Some(parent));
    }

    /// Removes `child` from the resolved children of `parent`.
    pub(crate) fn remove_child(&mut self, parent: BranchIndex, child: BranchIndex) {
        if self.branches[parent].segment.remove_child(child) {
            self.branches[child].segment.set_parent(None);
        }
    }

    /// Puts `new` in the place of `old` below `old`'s parent, or as root.
    pub(crate) fn replace_in_tree(&mut self, old: BranchIndex, new: BranchIndex) {
        match self.branches[old].segment.parent() {
            Some(parent) => {
                self.branches[parent].segment.replace_child(old, new);
                self.branches[new].segment.set_parent(Some(parent));
                self.branches[old].segment.set_parent(None);
            }
            None => {
                if self.root == Some(old) {
                    self.root = Some(new);
                }
            }
        }
    }

    /// Clears the resolved links of every branch and unsets the root.
    pub(crate) fn clear_resolved_tree(&mut self) {
        for branch in self.branches.iter_mut() {
            branch.segment.clear_links();
            branch.resolved_connection = None;
        }
        self.root = None;
    }

    /// Reverses the segment of `branch` and toggles its orientation flag.
    pub(crate) fn flip_branch(&mut self, branch: BranchIndex) {
        self.branches[branch].flip();
    }

    pub(crate) fn push_branch(&mut self, branch: CompositeBranch) -> BranchIndex {
        let index = self.branches.len();
        self.branches.push(branch);
        index
    }
}

// ============================================================================
// Splitting (pub)
// ============================================================================
impl Composite {
    /// Splits `branch` in two, returning the new upstream piece `before`.
    ///
    /// The first `split_point` markers (in current order) move into `before`;
    /// the rest stay. Let `E` be the end the first marker currently sits at.
    /// Then:
    /// - connections of `branch` entering at `E` move to `before`
    /// - connections naming `branch` as parent at `E` now name `before`
    /// - every match is split at the equivalent point; `before` gets the
    ///   upstream parts, `branch` keeps the rest
    /// - `before` inherits the miss evidence of `branch`, so both keep the
    ///   same confidence
    /// - for every match, a connection `branch --E--> before` is added
    ///
    /// `before` inherits the orientation flag, so ends mean the same on both
    /// pieces. It is not linked into the resolved tree; that is the caller's job.
    ///
    /// # Errors
    /// [Error::UnknownBranch] or [Error::SplitOutOfRange] unless
    /// `0 < split_point < len - 1`.
    pub fn split_branch(&mut self, branch: BranchIndex, split_point: usize) -> Result<BranchIndex> {
        self.check_branch(branch)?;
        let len = self.branches[branch].segment.len();
        if split_point == 0 || split_point + 1 >= len {
            return Err(Error::SplitOutOfRange {
                branch,
                split_point,
                len,
            });
        }

        let split_end = self.branches[branch].first_marker_end();
        let reversed = self.branches[branch].segment_reversed;
        let fraction = split_point as f64 / len as f64;

        let front = self.branches[branch].segment.split_off_front(split_point);
        let mut upstream = CompositeBranch::new(front);
        upstream.segment_reversed = reversed;
        let before = self.push_branch(upstream);

        // Candidate parents entering at the split-off end
        let moving: Vec<ConnectionIndex> = self.branches[branch]
            .parent_connections
            .iter()
            .copied()
            .filter(|&c| self.connections[c].child_end() == split_end)
            .collect();
        for c in moving {
            self.move_connection(c, |connection| connection.set_child(before));
        }

        // Candidate children hanging off the split-off end
        let moving: Vec<ConnectionIndex> = self.branches[branch].child_connections(split_end).to_vec();
        for c in moving {
            self.move_connection(c, |connection| connection.set_parent(before));
        }

        // Matches
        let matches = self.branches[branch].take_matches();
        let mut remaining = Vec::with_capacity(matches.len());
        for m in matches {
            let (upstream_part, rest) = m.split(fraction, m.forward != reversed);
            self.branches[before].add_branch_match(upstream_part);
            remaining.push(rest);
        }
        let inherited_misses =
            self.branches[branch].confidence_denominator() - self.branches[before].confidence_denominator();
        if inherited_misses > 0.0 {
            self.branches[before].add_branch_miss(inherited_misses);
        }

        // Link pieces in the candidate graph
        for m in &remaining {
            self.add_connection(Connection::new(
                branch,
                split_end,
                before,
                split_end.opposite(),
                m.reconstruction,
                m.confidence,
            ))?;
        }
        self.branches[branch].replace_matches(remaining);

        debug!(branch, before, split_point, len, "split branch");

        Ok(before)
    }
}

// ============================================================================
// Copying (pub)
// ============================================================================
impl Composite {
    /// Returns an independent deep copy.
    ///
    /// Markers, matches and connections are cloned; the connection arena is
    /// compacted to the connections still attached to a branch, and all
    /// stored connection indices are rewritten through one remap table.
    /// Branch indices are preserved.
    pub fn copy(&self) -> Composite {
        let mut remap = vec![NO_CONNECTION; self.connections.len()];
        let mut connections = Vec::with_capacity(self.connections.len());
        for branch in &self.branches {
            for &c in &branch.parent_connections {
                if remap[c] == NO_CONNECTION {
                    remap[c] = connections.len();
                    connections.push(self.connections[c].clone());
                }
            }
        }

        let branches = self
            .branches
            .iter()
            .map(|branch| {
                let mut copy = branch.clone();
                copy.remap_connections(|c| remap[c]);
                copy
            })
            .collect();

        Composite {
            branches,
            connections,
            root: self.root,
            reconstructions: self.reconstructions.clone(),
            segment_lookup: self.segment_lookup.clone(),
        }
    }
}

/// Checks that a vote weight is finite and positive.
pub(crate) fn check_confidence(confidence: f64) -> Result<()> {
    if confidence.is_finite() && confidence > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfidence(confidence))
    }
}
