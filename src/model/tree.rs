//! Provides the segment tree representation.
//!
//! A [SegmentTree] is the shape shared by every input reconstruction and by
//! the consensus output: a rooted tree of [Segment]s (unbranched polylines),
//! stored in an arena and addressed by [SegmentIndex].

use crate::model::segment::{MarkerRef, Segment, SegmentIndex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// *During construction only*, index for unset root.
const NO_ROOT_SET_INDEX: SegmentIndex = usize::MAX;

// =$========================================================================$=
// SEGMENT TREE
// =$========================================================================$=
/// A rooted tree of polyline segments represented using the arena pattern.
///
/// Segments are stored in a contiguous vector and referenced by
/// [SegmentIndex]. Branching is n-ary: a segment may have any number of
/// children, all of which hang off its last marker.
///
/// # Structure
/// - All segments are stored in the arena, root included.
/// - Index of root is maintained.
/// - Parent and children links are kept mutually consistent by
///   [add_child](SegmentTree::add_child).
/// - Children order is insertion order; traversals respect it.
///
/// # Construction
/// Add the root first with [add_root](SegmentTree::add_root), then attach
/// segments top-down with [add_child](SegmentTree::add_child).
/// Test validity with [`SegmentTree::is_valid()`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTree {
    /// Segments of this tree (arena pattern)
    segments: Vec<Segment>,

    /// Index of the root segment
    root_index: SegmentIndex,

    /// Name of tree; optional, e.g. the source file of a reconstruction
    name: Option<String>,
}

// ============================================================================
// New, Getters / Accessors, etc. (pub)
// ============================================================================
impl SegmentTree {
    /// Creates a new empty tree.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new empty tree with capacity for `num_segments` segments.
    pub fn with_capacity(num_segments: usize) -> Self {
        SegmentTree {
            segments: Vec::with_capacity(num_segments),
            root_index: NO_ROOT_SET_INDEX,
            name: None,
        }
    }

    /// Attaches a name to this tree.
    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    /// Adds the root segment, assigning a unique index, which gets returned.
    ///
    /// Any links the segment carries are cleared.
    ///
    /// # Panics
    /// Panics if a root has already been set.
    pub fn add_root(&mut self, mut segment: Segment) -> SegmentIndex {
        assert!(!self.is_root_set(), "Root already set");
        segment.clear_links();

        let index = self.segments.len();
        self.segments.push(segment);
        self.root_index = index;

        index
    }

    /// Adds a segment as child of `parent`, assigning a unique index, which
    /// gets returned.
    ///
    /// Any links the segment carries are replaced.
    ///
    /// # Arguments
    /// * `parent` - Index of the parent segment
    /// * `segment` - The new segment
    ///
    /// # Panics
    /// Panics if `parent` is out of bounds.
    pub fn add_child(&mut self, parent: SegmentIndex, mut segment: Segment) -> SegmentIndex {
        assert!(parent < self.segments.len(), "Parent {} out of bounds", parent);
        segment.clear_links();
        segment.set_parent(Some(parent));

        let index = self.segments.len();
        self.segments.push(segment);
        self[parent].add_child(index);

        index
    }

    /// Returns reference to name of this tree, or `None` if not set.
    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    /// Set a name for this tree.
    pub fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    /// Returns whether root of tree has been set.
    pub fn is_root_set(&self) -> bool {
        self.root_index != NO_ROOT_SET_INDEX
    }

    /// Returns the index of the root, or `None` for an empty tree.
    pub fn root_index(&self) -> Option<SegmentIndex> {
        self.is_root_set().then_some(self.root_index)
    }

    /// Returns a reference to the root segment.
    ///
    /// # Panics
    /// Panics if the root hasn't been set.
    pub fn root(&self) -> &Segment {
        &self[self.root_index]
    }

    /// Returns a reference to the segment at the given index.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn segment(&self, index: SegmentIndex) -> &Segment {
        &self[index]
    }

    /// Returns the segment at the given index, or `None` if out of bounds.
    pub fn get(&self, index: SegmentIndex) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Returns all segments in arena order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the number of segments in this tree.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if the tree holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the number of markers over all segments.
    pub fn num_markers(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Returns the number of segments without children.
    pub fn num_terminals(&self) -> usize {
        self.segments.iter().filter(|s| s.is_terminal()).count()
    }

    /// Returns the summed polyline length of all segments.
    pub fn total_length(&self) -> f64 {
        self.segments.iter().map(Segment::length).sum()
    }

    /// Returns the marker preceding `marker` in the stitched tree.
    ///
    /// Within a segment that is the previous marker; for the first marker of
    /// a segment it is the segment's attachment (if any).
    ///
    /// # Panics
    /// Panics if `marker.segment` is out of bounds.
    pub fn marker_parent(&self, marker: MarkerRef) -> Option<MarkerRef> {
        if marker.marker > 0 {
            Some(MarkerRef {
                segment: marker.segment,
                marker: marker.marker - 1,
            })
        } else {
            self[marker.segment].attachment()
        }
    }

    /// Validates the tree structure and all index references.
    ///
    /// Checks:
    /// - Root index is set and in bounds, and the root has no parent
    /// - All child indices are in bounds and point back to this segment
    /// - All non-root segments have a parent that lists them as child
    /// - Every segment is reachable from the root exactly once (no cycles)
    /// - Attachments point at existing markers of the parent
    ///
    /// # Returns
    /// `true` if tree is valid, `false` otherwise
    pub fn is_valid(&self) -> bool {
        if !self.is_root_set() || self.root_index >= self.segments.len() {
            return false;
        }

        if self.root().parent().is_some() {
            return false;
        }

        for (index, segment) in self.segments.iter().enumerate() {
            // Check children point back to this segment as parent
            for &child in segment.children() {
                if child >= self.segments.len() || self.segments[child].parent() != Some(index) {
                    return false;
                }
            }

            // Check parent includes this segment in its children
            if index != self.root_index {
                match segment.parent() {
                    None => return false,
                    Some(parent) => {
                        if parent >= self.segments.len()
                            || !self.segments[parent].children().contains(&index)
                        {
                            return false;
                        }
                    }
                }
            }

            // Check attachment points into parent
            if let Some(attachment) = segment.attachment() {
                if Some(attachment.segment) != segment.parent()
                    || attachment.marker >= self.segments[attachment.segment].len()
                {
                    return false;
                }
            }
        }

        // Reachability: exactly num_segments distinct visits
        let mut visited = vec![false; self.segments.len()];
        let mut count = 0;
        for index in self.pre_order_indices() {
            if visited[index] {
                return false;
            }
            visited[index] = true;
            count += 1;
        }

        count == self.segments.len()
    }

    /// Returns an iterator over the tree in pre-order (parents before children).
    ///
    /// Children are visited in insertion order. The traversal uses an
    /// explicit stack, so deep trees do not recurse.
    pub fn pre_order_iter(&self) -> PreOrderIter<'_> {
        PreOrderIter::new(self)
    }

    /// Returns an iterator over the tree in post-order (children before parents).
    pub fn post_order_iter(&self) -> PostOrderIter<'_> {
        PostOrderIter::new(self)
    }

    /// Returns segment indices in pre-order, guarding against cycles.
    fn pre_order_indices(&self) -> Vec<SegmentIndex> {
        let mut order = Vec::with_capacity(self.segments.len());
        let mut stack = vec![self.root_index];
        while let Some(index) = stack.pop() {
            order.push(index);
            // A cyclic arena would loop forever without this bound
            if order.len() > self.segments.len() {
                break;
            }
            stack.extend(self[index].children().iter().rev());
        }
        order
    }
}

impl Default for SegmentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<SegmentIndex> for SegmentTree {
    type Output = Segment;

    fn index(&self, index: SegmentIndex) -> &Self::Output {
        &self.segments[index]
    }
}

impl std::ops::IndexMut<SegmentIndex> for SegmentTree {
    fn index_mut(&mut self, index: SegmentIndex) -> &mut Self::Output {
        &mut self.segments[index]
    }
}

// ============================================================================
// Printing (pub)
// ============================================================================
/// Renders a visual representation of the tree.
///
/// # Example Output
/// ```text
/// Tree with 3 segments (12 markers total):
/// [0] 4 markers (length: 3.000)
///   ├─ [1] 4 markers (length: 3.000)
///   └─ [2] 4 markers (length: 3.000)
/// ```
impl fmt::Display for SegmentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_segment(
            tree: &SegmentTree,
            f: &mut fmt::Formatter<'_>,
            index: SegmentIndex,
            prefix: &str,
            is_last: bool,
            is_root: bool,
        ) -> fmt::Result {
            let segment = &tree[index];
            let connector = if is_root { "" } else if is_last { "└─ " } else { "├─ " };
            writeln!(
                f,
                "{}{}[{}] {} markers (length: {:.3})",
                prefix,
                connector,
                index,
                segment.len(),
                segment.length()
            )?;

            let child_prefix = if is_root {
                "  ".to_string()
            } else {
                format!("{}{}  ", prefix, if is_last { " " } else { "│" })
            };
            let children = segment.children();
            for (i, &child) in children.iter().enumerate() {
                write_segment(tree, f, child, &child_prefix, i + 1 == children.len(), false)?;
            }
            Ok(())
        }

        writeln!(
            f,
            "Tree with {} segments ({} markers total):",
            self.num_segments(),
            self.num_markers()
        )?;

        if self.is_root_set() {
            write_segment(self, f, self.root_index, "", true, true)
        } else {
            writeln!(f, "(No root set)")
        }
    }
}

// =#========================================================================#=
// ITERATORS
// =#========================================================================#=
/// Iterator for pre-order traversal (parents before children).
///
/// Yields `(index, segment)` pairs using a stack-based approach without
/// recursion.
pub struct PreOrderIter<'a> {
    tree: &'a SegmentTree,
    stack: Vec<SegmentIndex>,
}

impl<'a> PreOrderIter<'a> {
    fn new(tree: &'a SegmentTree) -> Self {
        let mut stack = Vec::new();
        if tree.is_root_set() {
            stack.push(tree.root_index);
        }
        PreOrderIter { tree, stack }
    }
}

impl<'a> Iterator for PreOrderIter<'a> {
    type Item = (SegmentIndex, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let segment = &self.tree[index];

        // Push children reversed, so the first child is processed first
        self.stack.extend(segment.children().iter().rev());

        Some((index, segment))
    }
}

/// Iterator for post-order traversal (children before parents).
///
/// Yields `(index, segment)` pairs; each segment is visited after all its
/// descendants.
pub struct PostOrderIter<'a> {
    tree: &'a SegmentTree,
    stack: Vec<(SegmentIndex, bool)>, // (index, children_visited)
}

impl<'a> PostOrderIter<'a> {
    fn new(tree: &'a SegmentTree) -> Self {
        let mut stack = Vec::new();
        if tree.is_root_set() {
            stack.push((tree.root_index, false));
        }
        PostOrderIter { tree, stack }
    }
}

impl<'a> Iterator for PostOrderIter<'a> {
    type Item = (SegmentIndex, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((index, children_visited)) = self.stack.pop() {
            let segment = &self.tree[index];

            if children_visited || segment.is_terminal() {
                return Some((index, segment));
            }

            self.stack.push((index, true));
            self.stack
                .extend(segment.children().iter().rev().map(|&c| (c, false)));
        }
        None
    }
}
