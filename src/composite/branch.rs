//! Composite branch: one segment of the composite plus its evidence.

use crate::composite::connection::{BranchEnd, ConnectionIndex};
use crate::composite::BranchIndex;
use crate::model::{ReconstructionId, Segment, SegmentIndex};
use std::ops::Range;

// =#========================================================================#=
// BRANCH MATCH
// =#========================================================================#=
/// Record that (part of) a reconstruction segment was matched to a
/// composite branch.
///
/// `span` is the range of reconstruction markers covered; it is the whole
/// segment on ingestion and shrinks when the composite branch is split.
/// `forward` tells whether the reconstruction's marker order runs along the
/// branch's original order (`Top` to `Bottom`).
#[derive(Debug, Clone, PartialEq)]
pub struct BranchMatch {
    pub reconstruction: ReconstructionId,
    pub segment: SegmentIndex,
    pub span: Range<usize>,
    pub forward: bool,
    pub confidence: f64,
}

impl BranchMatch {
    /// Creates a match covering all `len` markers of a reconstruction segment.
    pub fn whole(
        reconstruction: ReconstructionId,
        segment: SegmentIndex,
        len: usize,
        forward: bool,
        confidence: f64,
    ) -> Self {
        BranchMatch {
            reconstruction,
            segment,
            span: 0..len,
            forward,
            confidence,
        }
    }

    /// Splits the span at the equivalent point of a branch split.
    ///
    /// # Arguments
    /// * `fraction` - Share of the branch moved to the new upstream piece
    /// * `takes_prefix` - Whether that piece corresponds to the start of the span
    ///
    /// # Returns
    /// `(before, after)`: the part matching the upstream piece and the rest.
    /// Spans too short to divide are shared by both parts.
    pub(crate) fn split(&self, fraction: f64, takes_prefix: bool) -> (BranchMatch, BranchMatch) {
        let len = self.span.len();
        if len < 2 {
            return (self.clone(), self.clone());
        }

        let cut = ((fraction * len as f64).round() as usize).clamp(1, len - 1);
        let (front, back) = if takes_prefix {
            (self.span.start..self.span.start + cut, self.span.start + cut..self.span.end)
        } else {
            (self.span.end - cut..self.span.end, self.span.start..self.span.end - cut)
        };

        let mut before = self.clone();
        before.span = front;
        let mut after = self.clone();
        after.span = back;
        (before, after)
    }
}

// =#========================================================================#=
// COMPOSITE BRANCH
// =#========================================================================#=
/// Wraps one [Segment] inside the composite tree.
///
/// A branch keeps two views of its connectivity:
/// - the *candidate graph*: every parent [Connection](crate::composite::Connection)
///   any reconstruction voted for, plus the reverse index of connections
///   naming this branch as parent;
/// - the *resolved tree*: the single parent and the children chosen so far,
///   stored as the links of the owned segment.
///
/// Its confidence is `summed_confidence / confidence_denominator`: the
/// weighted share of reconstructions that agree this branch exists.
#[derive(Debug, Clone)]
pub struct CompositeBranch {
    pub(crate) segment: Segment,
    pub(crate) segment_reversed: bool,

    pub(crate) parent_connections: Vec<ConnectionIndex>,
    pub(crate) best_connection: Option<ConnectionIndex>,
    pub(crate) top_child_connections: Vec<ConnectionIndex>,
    pub(crate) bottom_child_connections: Vec<ConnectionIndex>,
    pub(crate) combined_connection_weight: f64,
    pub(crate) resolved_connection: Option<ConnectionIndex>,

    summed_confidence: f64,
    confidence_denominator: f64,
    matches: Vec<BranchMatch>,
}

impl CompositeBranch {
    /// Creates a branch owning `segment`, without evidence or links.
    pub(crate) fn new(segment: Segment) -> Self {
        CompositeBranch {
            segment,
            segment_reversed: false,
            parent_connections: Vec::new(),
            best_connection: None,
            top_child_connections: Vec::new(),
            bottom_child_connections: Vec::new(),
            combined_connection_weight: 0.0,
            resolved_connection: None,
            summed_confidence: 0.0,
            confidence_denominator: 0.0,
            matches: Vec::new(),
        }
    }

    /// Returns the owned segment (markers in current orientation).
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Returns `true` if the markers run `Bottom` to `Top`.
    pub fn is_reversed(&self) -> bool {
        self.segment_reversed
    }

    /// Returns the end at which the first marker currently sits.
    pub fn first_marker_end(&self) -> BranchEnd {
        if self.segment_reversed {
            BranchEnd::Bottom
        } else {
            BranchEnd::Top
        }
    }

    /// Returns the end at which the last marker currently sits.
    pub fn last_marker_end(&self) -> BranchEnd {
        self.first_marker_end().opposite()
    }

    /// Returns the resolved parent, if any.
    pub fn parent(&self) -> Option<BranchIndex> {
        self.segment.parent()
    }

    /// Returns the resolved children.
    pub fn children(&self) -> &[BranchIndex] {
        self.segment.children()
    }

    /// Returns the candidate parent connections, in insertion order.
    pub fn parent_connections(&self) -> &[ConnectionIndex] {
        &self.parent_connections
    }

    /// Returns the highest-confidence candidate parent connection.
    pub fn best_connection(&self) -> Option<ConnectionIndex> {
        self.best_connection
    }

    /// Returns the connections naming this branch as parent at `end`.
    pub fn child_connections(&self, end: BranchEnd) -> &[ConnectionIndex] {
        match end {
            BranchEnd::Top => &self.top_child_connections,
            BranchEnd::Bottom => &self.bottom_child_connections,
        }
    }

    /// Returns the connection the resolved parent link was chosen from.
    pub fn resolved_connection(&self) -> Option<ConnectionIndex> {
        self.resolved_connection
    }

    /// Returns the total confidence of all candidate parent connections.
    pub fn combined_connection_weight(&self) -> f64 {
        self.combined_connection_weight
    }

    /// Returns the normalized confidence in `[0, 1]`, or `None` if no
    /// evidence (match or miss) was ever recorded.
    pub fn confidence(&self) -> Option<f64> {
        if self.confidence_denominator > 0.0 {
            Some(self.summed_confidence / self.confidence_denominator)
        } else {
            None
        }
    }

    /// Returns the summed confidence of all matches.
    pub fn summed_confidence(&self) -> f64 {
        self.summed_confidence
    }

    /// Returns the summed confidence of all matches and misses.
    pub fn confidence_denominator(&self) -> f64 {
        self.confidence_denominator
    }

    /// Returns the per-reconstruction matches.
    pub fn matches(&self) -> &[BranchMatch] {
        &self.matches
    }

    /// Records a matching reconstruction branch (positive evidence).
    pub(crate) fn add_branch_match(&mut self, branch_match: BranchMatch) {
        self.summed_confidence += branch_match.confidence;
        self.confidence_denominator += branch_match.confidence;
        self.matches.push(branch_match);
    }

    /// Records a reconstruction that has no branch here (negative evidence).
    pub(crate) fn add_branch_miss(&mut self, confidence: f64) {
        self.confidence_denominator += confidence;
    }

    /// Replaces the match records without touching the confidence sums.
    pub(crate) fn replace_matches(&mut self, matches: Vec<BranchMatch>) {
        self.matches = matches;
    }

    pub(crate) fn take_matches(&mut self) -> Vec<BranchMatch> {
        std::mem::take(&mut self.matches)
    }

    /// Reverses the segment and toggles the orientation flag.
    pub(crate) fn flip(&mut self) {
        self.segment.reverse();
        self.segment_reversed = !self.segment_reversed;
    }

    pub(crate) fn child_connections_mut(&mut self, end: BranchEnd) -> &mut Vec<ConnectionIndex> {
        match end {
            BranchEnd::Top => &mut self.top_child_connections,
            BranchEnd::Bottom => &mut self.bottom_child_connections,
        }
    }

    /// Rewrites every stored connection index through `remap`.
    pub(crate) fn remap_connections(&mut self, remap: impl Fn(ConnectionIndex) -> ConnectionIndex) {
        for list in [
            &mut self.parent_connections,
            &mut self.top_child_connections,
            &mut self.bottom_child_connections,
        ] {
            for c in list.iter_mut() {
                *c = remap(*c);
            }
        }
        self.best_connection = self.best_connection.map(&remap);
        self.resolved_connection = self.resolved_connection.map(&remap);
    }
}
