//! Majority consensus: collapsing the voted candidate graph into one tree.
//!
//! [Composite::generate_consensus] works on a private [copy](Composite::copy)
//! of the composite and runs these phases:
//!
//! 1. **Threshold** - branches with confidence below the (normalized)
//!    threshold are set aside as *removed*; the resolved tree is cleared.
//! 2. **Resolve** - remaining branches are taken highest
//!    `combined_connection_weight` first. Each picks its best candidate
//!    connection whose parent is not removed (or, failing that, rescues a
//!    removed parent), is oriented so it enters its parent at its first
//!    marker, and is linked. Attaching to an end that is already in use
//!    splits a branch so that no end is booked twice.
//! 3. **Reattach** - subtrees left floating (their parent was dropped, their
//!    only candidate parents hung below them, or no root candidate survived)
//!    are hooked into the rooted tree, or dropped.
//! 4. **Stitch** - each child's first marker is attached to its parent's
//!    last marker.
//!
//! The loop in phase 2 checks the optional cancellation flag of
//! [ConsensusOptions] at the top of every iteration.

use crate::composite::connection::{BranchEnd, ConnectionIndex};
use crate::composite::graph::{BranchIndex, Composite};
use crate::error::{Error, Result};
use crate::model::{MarkerRef, Segment, SegmentTree};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, info_span, trace, warn};

/// Fewest markers a branch needs to be split at index 1.
const MIN_SPLITTABLE_LEN: usize = 3;

// =#========================================================================#=
// OPTIONS
// =#========================================================================#=
/// Configuration of a consensus run.
///
/// # Example
/// ```
/// use arbor_consensus::composite::ConsensusOptions;
///
/// let options = ConsensusOptions::new(0.5).with_rescue(false);
/// assert_eq!(options.threshold(), 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct ConsensusOptions {
    branch_confidence_threshold: f64,
    rescue_removed_parents: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl ConsensusOptions {
    /// Creates options with the given branch confidence threshold.
    ///
    /// Values below 1 are fractions of agreeing reconstructions; values of
    /// 1 or more are vote counts, divided by the number of reconstructions.
    pub fn new(branch_confidence_threshold: f64) -> Self {
        ConsensusOptions {
            branch_confidence_threshold,
            rescue_removed_parents: true,
            cancel: None,
        }
    }

    /// Enables or disables rescuing removed parents (default: enabled).
    pub fn with_rescue(mut self, rescue: bool) -> Self {
        self.rescue_removed_parents = rescue;
        self
    }

    /// Sets a flag that cancels the run once it turns `true`.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Returns the threshold as given.
    pub fn threshold(&self) -> f64 {
        self.branch_confidence_threshold
    }

    /// Returns the threshold as a fraction for `num_reconstructions`.
    ///
    /// # Errors
    /// [Error::InvalidThreshold] if negative or not finite,
    /// [Error::NoReconstructions] if `num_reconstructions` is 0.
    pub fn normalized_threshold(&self, num_reconstructions: usize) -> Result<f64> {
        let threshold = self.branch_confidence_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::InvalidThreshold(threshold));
        }
        if num_reconstructions == 0 {
            return Err(Error::NoReconstructions);
        }
        if threshold >= 1.0 {
            Ok(threshold / num_reconstructions as f64)
        } else {
            Ok(threshold)
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        Self::new(0.5)
    }
}

// =#========================================================================#=
// RESULT
// =#========================================================================#=
/// Aggregated outcome of one consensus run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSummary {
    /// Normalized threshold that was applied
    pub threshold: f64,
    /// Branches in the consensus tree
    pub resolved: usize,
    /// Branches below threshold (after rescues)
    pub removed: usize,
    /// Branches above threshold that could not be attached
    pub dropped: usize,
    /// Removed branches reinstated as parents
    pub rescued: usize,
    /// Branch splits performed to resolve end conflicts
    pub splits: usize,
    /// End conflicts on branches too short to split
    pub unsplittable_conflicts: usize,
    /// Floating subtrees attached after the main pass
    pub reattached: usize,
}

/// A resolved consensus tree together with its summary.
#[derive(Debug)]
pub struct Consensus {
    composite: Composite,
    summary: ConsensusSummary,
}

impl Consensus {
    /// Returns the resolved composite.
    pub fn composite(&self) -> &Composite {
        &self.composite
    }

    /// Returns the outcome counts of the run.
    pub fn summary(&self) -> &ConsensusSummary {
        &self.summary
    }

    /// Returns the root branch, `None` if nothing survived.
    pub fn root(&self) -> Option<BranchIndex> {
        self.composite.root()
    }

    /// Consumes the consensus, returning the resolved composite.
    pub fn into_composite(self) -> Composite {
        self.composite
    }

    /// Returns the branches of the consensus tree in pre-order.
    pub fn branches_ordered(&self) -> Vec<BranchIndex> {
        self.composite.get_segments_ordered().into_iter().map(|(b, _)| b).collect()
    }

    /// Converts the consensus into a standalone [SegmentTree].
    ///
    /// Segments appear in pre-order, so the root is index 0; marker
    /// attachments are carried over.
    pub fn to_segment_tree(&self) -> SegmentTree {
        let ordered = self.composite.get_segments_ordered();
        let mut tree = SegmentTree::with_capacity(ordered.len());
        let mut new_index: HashMap<BranchIndex, usize> = HashMap::with_capacity(ordered.len());

        for (branch, segment) in ordered {
            let copy = segment.detached_copy();
            let index = match segment.parent().and_then(|p| new_index.get(&p).copied()) {
                Some(parent) => {
                    let index = tree.add_child(parent, copy);
                    if let Some(attachment) = segment.attachment() {
                        tree[index].set_attachment(Some(MarkerRef {
                            segment: parent,
                            marker: attachment.marker,
                        }));
                    }
                    index
                }
                None => tree.add_root(copy),
            };
            new_index.insert(branch, index);
        }

        tree
    }
}

// =#========================================================================#=
// RESOLUTION
// =#========================================================================#=
/// Bookkeeping of one resolution pass.
#[derive(Debug, Default)]
struct Resolution {
    /// End at which each resolved branch connects to its parent (or enters as root)
    parent_end: HashMap<BranchIndex, BranchEnd>,
    /// End of its parent at which each resolved child is attached
    attached_at: HashMap<BranchIndex, BranchEnd>,
    removed: HashSet<BranchIndex>,
    dropped: HashSet<BranchIndex>,
    /// Unresolved branches whose candidate parents all were their own descendants
    deferred: HashSet<BranchIndex>,
    summary: ConsensusSummary,
}

impl Resolution {
    fn is_resolved(&self, branch: BranchIndex) -> bool {
        self.parent_end.contains_key(&branch)
    }

    fn is_excluded(&self, branch: BranchIndex) -> bool {
        self.removed.contains(&branch) || self.dropped.contains(&branch)
    }
}

/// Outcome of candidate selection for one branch.
enum Choice {
    Connection(ConnectionIndex),
    Rescue(ConnectionIndex, BranchIndex),
    /// Only candidates that would close a cycle remain
    Defer,
    None,
}

// ============================================================================
// Consensus generation (pub)
// ============================================================================
impl Composite {
    /// Generates the majority consensus at `threshold` with default options.
    ///
    /// See [generate_consensus_with](Composite::generate_consensus_with).
    pub fn generate_consensus(&self, threshold: f64) -> Result<Consensus> {
        self.generate_consensus_with(&ConsensusOptions::new(threshold))
    }

    /// Generates the majority consensus tree.
    ///
    /// Works on a deep copy; `self` is not modified, so this may be called
    /// repeatedly (and from several threads) on the same composite.
    ///
    /// # Errors
    /// * [Error::InvalidThreshold] / [Error::NoReconstructions] - see
    ///   [ConsensusOptions::normalized_threshold]
    /// * [Error::Cancelled] - cancellation flag was raised
    ///
    /// # Panics
    /// Panics if the result violates the resolved-tree invariants, which
    /// indicates a bug in the resolution algorithm.
    pub fn generate_consensus_with(&self, options: &ConsensusOptions) -> Result<Consensus> {
        let threshold = options.normalized_threshold(self.num_reconstructions())?;
        let _span = info_span!("consensus", threshold).entered();

        let mut composite = self.copy();
        let summary = composite.convert_to_consensus(threshold, options)?;
        assert!(
            composite.validate_tree(),
            "consensus resolution produced an invalid tree"
        );

        info!(
            resolved = summary.resolved,
            removed = summary.removed,
            dropped = summary.dropped,
            rescued = summary.rescued,
            splits = summary.splits,
            reattached = summary.reattached,
            "consensus generated"
        );
        Ok(Consensus { composite, summary })
    }

    /// Resolves this composite in place into its consensus tree.
    fn convert_to_consensus(
        &mut self,
        threshold: f64,
        options: &ConsensusOptions,
    ) -> Result<ConsensusSummary> {
        let mut state = Resolution {
            summary: ConsensusSummary {
                threshold,
                ..ConsensusSummary::default()
            },
            ..Resolution::default()
        };

        // Threshold
        for (index, branch) in self.branches.iter().enumerate() {
            let keep = branch.confidence().map_or(threshold <= 0.0, |c| c >= threshold);
            if !keep {
                state.removed.insert(index);
            }
        }
        self.clear_resolved_tree();

        let mut pending: Vec<BranchIndex> = (0..self.branches.len())
            .filter(|b| !state.removed.contains(b))
            .collect();

        // Resolve
        while !pending.is_empty() {
            if options.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.sort_by_weight(&mut pending);
            let branch = pending.remove(0);
            self.resolve_branch(branch, &mut state, &mut pending, options)?;
        }

        self.reattach_floating(&mut state)?;

        // Detach everything outside the tree
        let reachable = self.reachable_from_root();
        for (index, branch) in self.branches.iter_mut().enumerate() {
            if !reachable[index] {
                branch.segment.clear_links();
                branch.resolved_connection = None;
            }
        }

        self.stitch_markers();

        state.summary.resolved = reachable.iter().filter(|&&r| r).count();
        state.summary.removed = state.removed.len();
        Ok(state.summary)
    }

    /// Sorts by descending `combined_connection_weight`, ties by index.
    fn sort_by_weight(&self, branches: &mut [BranchIndex]) {
        branches.sort_by(|&a, &b| {
            let wa = self.branches[a].combined_connection_weight;
            let wb = self.branches[b].combined_connection_weight;
            wb.total_cmp(&wa).then(a.cmp(&b))
        });
    }

    /// Returns the candidate connections of `branch`, highest confidence
    /// first, ties in insertion order.
    fn ranked_candidates(&self, branch: BranchIndex) -> Vec<ConnectionIndex> {
        let mut candidates = self.branches[branch].parent_connections.clone();
        candidates.sort_by(|&a, &b| {
            self.connections[b]
                .confidence()
                .total_cmp(&self.connections[a].confidence())
        });
        candidates
    }

    /// Returns `true` if linking `branch` below `parent` would close a cycle.
    fn would_cycle(&self, branch: BranchIndex, parent: BranchIndex) -> bool {
        let mut current = Some(parent);
        let mut steps = 0;
        while let Some(node) = current {
            if node == branch || steps > self.branches.len() {
                return true;
            }
            current = self.branches[node].segment.parent();
            steps += 1;
        }
        false
    }

    /// Picks the connection `branch` should be resolved through.
    fn choose_connection(&self, branch: BranchIndex, state: &Resolution, rescue: bool) -> Choice {
        let mut blocked = Vec::new();
        let mut cyclic = false;

        for c in self.ranked_candidates(branch) {
            match self.connections[c].parent() {
                None => {
                    if self.root.is_none() {
                        return Choice::Connection(c);
                    }
                }
                Some(parent) => {
                    if state.dropped.contains(&parent) {
                        continue;
                    }
                    if self.would_cycle(branch, parent) {
                        cyclic = true;
                        continue;
                    }
                    if state.removed.contains(&parent) {
                        blocked.push((c, parent));
                        continue;
                    }
                    return Choice::Connection(c);
                }
            }
        }

        // Joint likelihood of parent existing and the edge being right
        let mut best: Option<(ConnectionIndex, BranchIndex, f64)> = None;
        if rescue {
            for (c, parent) in blocked {
                let likelihood = self.branches[parent].confidence().unwrap_or(0.0) * self.connections[c].confidence();
                if best.is_none_or(|(_, _, l)| likelihood > l) {
                    best = Some((c, parent, likelihood));
                }
            }
        }
        match best {
            Some((c, parent, _)) => Choice::Rescue(c, parent),
            None if cyclic => Choice::Defer,
            None => Choice::None,
        }
    }

    /// Resolves one branch popped from the pending list.
    fn resolve_branch(
        &mut self,
        branch: BranchIndex,
        state: &mut Resolution,
        pending: &mut Vec<BranchIndex>,
        options: &ConsensusOptions,
    ) -> Result<()> {
        let connection = match self.choose_connection(branch, state, options.rescue_removed_parents) {
            Choice::Connection(c) => c,
            Choice::Rescue(c, parent) => {
                debug!(branch, parent, "rescued removed parent");
                state.removed.remove(&parent);
                pending.push(parent);
                state.summary.rescued += 1;
                c
            }
            Choice::Defer => {
                trace!(branch, "candidate parents lie below the branch, deferring");
                self.release_children(branch, state);
                state.deferred.insert(branch);
                return Ok(());
            }
            Choice::None => {
                trace!(branch, "no usable connection, dropping branch");
                self.release_children(branch, state);
                state.dropped.insert(branch);
                state.summary.dropped += 1;
                return Ok(());
            }
        };

        trace!(branch, connection, "resolving branch");
        self.commit(branch, connection, state)
    }

    /// Unlinks the resolved children of `branch`; they float free.
    fn release_children(&mut self, branch: BranchIndex, state: &mut Resolution) {
        let children = self.branches[branch].segment.children().to_vec();
        for child in children {
            self.remove_child(branch, child);
            state.attached_at.remove(&child);
        }
    }

    /// Links `branch` into the resolved tree through `connection`.
    ///
    /// Splits the parent if the wanted end is the one it uses itself, and
    /// splits `branch` if it already has children at the end it is about to
    /// enter through.
    fn commit(&mut self, branch: BranchIndex, connection: ConnectionIndex, state: &mut Resolution) -> Result<()> {
        let child_end = self.connections[connection].child_end();
        let mut parent = self.connections[connection].parent();
        let mut attach_end = self.connections[connection].parent_end();

        // Parent end conflict
        if let Some(p) = parent {
            if state.parent_end.get(&p) == Some(&attach_end) {
                if self.branches[p].segment.len() >= MIN_SPLITTABLE_LEN {
                    let stub = self.split_resolved(p, state)?;
                    parent = Some(stub);
                    attach_end = attach_end.opposite();
                } else {
                    state.summary.unsplittable_conflicts += 1;
                    attach_end = attach_end.opposite();
                }
            }
        }

        // Direction
        if self.branches[branch].first_marker_end() != child_end {
            self.flip_branch(branch);
        }

        // Children already at the entry end
        let mut node = branch;
        let crowded: Vec<BranchIndex> = self.branches[branch]
            .segment
            .children()
            .iter()
            .copied()
            .filter(|c| state.attached_at.get(c) == Some(&child_end))
            .collect();
        if !crowded.is_empty() {
            if self.branches[branch].segment.len() >= MIN_SPLITTABLE_LEN {
                let stub = self.split_branch(branch, 1)?;
                state.summary.splits += 1;
                for child in crowded {
                    self.add_child(stub, child);
                    state.attached_at.insert(child, child_end.opposite());
                }
                self.add_child(stub, branch);
                state.parent_end.insert(branch, child_end);
                state.attached_at.insert(branch, child_end.opposite());
                self.branches[branch].resolved_connection = self.connection_from(branch, stub);
                node = stub;
            } else {
                state.summary.unsplittable_conflicts += 1;
            }
        }

        state.parent_end.insert(node, child_end);
        self.branches[node].resolved_connection = Some(connection);
        match parent {
            Some(p) => {
                self.add_child(p, node);
                state.attached_at.insert(node, attach_end);
            }
            None => {
                if let Some(old) = self.branches[node].segment.parent() {
                    self.remove_child(old, node);
                }
                state.attached_at.remove(&node);
                self.root = Some(node);
            }
        }

        Ok(())
    }

    /// Splits an already resolved branch at index 1 of its entry end and
    /// puts the new upstream stub in its place.
    ///
    /// # Returns
    /// The stub; the old branch hangs below it.
    fn split_resolved(&mut self, branch: BranchIndex, state: &mut Resolution) -> Result<BranchIndex> {
        let entry = state.parent_end[&branch];
        debug_assert_eq!(self.branches[branch].first_marker_end(), entry);

        let stub = self.split_branch(branch, 1)?;
        state.summary.splits += 1;

        self.replace_in_tree(branch, stub);
        if let Some(end) = state.attached_at.remove(&branch) {
            state.attached_at.insert(stub, end);
        }
        state.parent_end.insert(stub, entry);

        self.add_child(stub, branch);
        state.attached_at.insert(branch, entry.opposite());
        self.branches[branch].resolved_connection = self.connection_from(branch, stub);

        Ok(stub)
    }

    /// Returns the candidate connection of `child` naming `parent`, if any.
    fn connection_from(&self, child: BranchIndex, parent: BranchIndex) -> Option<ConnectionIndex> {
        self.branches[child]
            .parent_connections
            .iter()
            .copied()
            .find(|&c| self.connections[c].parent() == Some(parent))
    }

    /// Attaches subtrees that ended up outside the rooted tree.
    fn reattach_floating(&mut self, state: &mut Resolution) -> Result<()> {
        if self.root.is_none() {
            let mut heads = self.floating_heads(state);
            self.sort_by_weight(&mut heads);
            match heads.first() {
                Some(&head) => {
                    warn!(branch = head, "no root candidate survived, promoting branch to root");
                    self.root = Some(head);
                    state.attached_at.remove(&head);
                    if state.deferred.remove(&head) {
                        let entry = self.branches[head].first_marker_end();
                        state.parent_end.insert(head, entry);
                    }
                }
                None => return Ok(()),
            }
        }

        loop {
            let mut heads = self.floating_heads(state);
            if heads.is_empty() {
                return Ok(());
            }
            self.sort_by_weight(&mut heads);

            let mut progressed = false;
            for head in heads {
                let reachable = self.reachable_from_root();
                let candidate = self.ranked_candidates(head).into_iter().find(|&c| {
                    self.connections[c]
                        .parent()
                        .is_some_and(|p| reachable[p] && !state.is_excluded(p))
                });
                if let Some(connection) = candidate {
                    trace!(branch = head, connection, "reattaching floating subtree");
                    self.commit(head, connection, state)?;
                    state.deferred.remove(&head);
                    state.summary.reattached += 1;
                    progressed = true;
                }
            }

            if !progressed {
                for head in self.floating_heads(state) {
                    let subtree = self.subtree(head);
                    debug!(branch = head, size = subtree.len(), "dropping floating subtree");
                    for node in subtree {
                        state.dropped.insert(node);
                        state.summary.dropped += 1;
                    }
                }
                return Ok(());
            }
        }
    }

    /// Returns resolved or deferred parentless branches other than the root,
    /// in index order.
    fn floating_heads(&self, state: &Resolution) -> Vec<BranchIndex> {
        (0..self.branches.len())
            .filter(|&b| {
                Some(b) != self.root
                    && (state.is_resolved(b) || state.deferred.contains(&b))
                    && !state.dropped.contains(&b)
                    && self.branches[b].segment.parent().is_none()
            })
            .collect()
    }

    /// Returns `branch` and all its resolved descendants.
    fn subtree(&self, branch: BranchIndex) -> Vec<BranchIndex> {
        let mut nodes = Vec::new();
        let mut stack = vec![branch];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(self.branches[node].segment.children().iter().rev());
        }
        nodes
    }

    /// Flags every branch reachable from the root through resolved children.
    fn reachable_from_root(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.branches.len()];
        if let Some(root) = self.root {
            for node in self.subtree(root) {
                reachable[node] = true;
            }
        }
        reachable
    }

    /// Attaches the first marker of every child to its parent's last marker.
    fn stitch_markers(&mut self) {
        for index in 0..self.branches.len() {
            let attachment = self.branches[index].segment.parent().map(|parent| MarkerRef {
                segment: parent,
                marker: self.branches[parent].segment.len().saturating_sub(1),
            });
            self.branches[index].segment.set_attachment(attachment);
        }
    }
}

// ============================================================================
// Resolved tree queries (pub)
// ============================================================================
impl Composite {
    /// Returns the segments of the resolved tree in pre-order, children in
    /// insertion order, paired with their branch index.
    pub fn get_segments_ordered(&self) -> Vec<(BranchIndex, &Segment)> {
        match self.root {
            Some(root) => self
                .subtree(root)
                .into_iter()
                .map(|b| (b, &self.branches[b].segment))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Validates the resolved tree.
    ///
    /// Checks:
    /// - Root (if set) is in bounds and has no parent
    /// - Parent and children links are mutual inverses
    /// - Walking up from any branch ends at the root within `num_branches` steps
    /// - Without a root, no branch has links
    ///
    /// # Returns
    /// `true` if the resolved tree is valid, `false` otherwise
    pub fn validate_tree(&self) -> bool {
        let n = self.branches.len();
        let Some(root) = self.root else {
            return self
                .branches
                .iter()
                .all(|b| b.segment.parent().is_none() && b.segment.children().is_empty());
        };
        if root >= n || self.branches[root].segment.parent().is_some() {
            return false;
        }

        for (index, branch) in self.branches.iter().enumerate() {
            for &child in branch.segment.children() {
                if child >= n || self.branches[child].segment.parent() != Some(index) {
                    return false;
                }
            }

            let Some(parent) = branch.segment.parent() else {
                // Detached branches must not carry children
                if index != root && !branch.segment.children().is_empty() {
                    return false;
                }
                continue;
            };
            if parent >= n || !self.branches[parent].segment.children().contains(&index) {
                return false;
            }

            // Must reach the root without looping
            let mut current = parent;
            let mut steps = 0;
            while let Some(next) = self.branches[current].segment.parent() {
                current = next;
                steps += 1;
                if steps > n {
                    return false;
                }
            }
            if current != root {
                return false;
            }
        }

        true
    }
}
