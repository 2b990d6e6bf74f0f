//! Segment module: unbranched polylines and their tree links.

use crate::model::marker::Marker;
use serde::{Deserialize, Serialize};

/// Index of a segment in its arena (a [SegmentTree](crate::model::SegmentTree),
/// or, inside a composite, the branch owning it).
pub type SegmentIndex = usize;

// =#========================================================================#=
// SEGMENT
// =#========================================================================#=
/// An ordered polyline of [Marker]s representing one unbranched stretch of
/// structure, together with its links in a tree of segments.
///
/// # Invariants
/// - `parent` and `children` index into the same arena as this segment
/// - `children` holds no duplicates; order is insertion order
/// - `attachment`, if set, points at a marker of the parent segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Points of the polyline, first to last
    markers: Vec<Marker>,
    /// Parent segment, `None` for a root or a detached segment
    parent: Option<SegmentIndex>,
    /// Child segments, in insertion order
    children: Vec<SegmentIndex>,
    /// Marker of the parent that the first marker of this segment hangs off
    attachment: Option<MarkerRef>,
}

/// Reference to one marker of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRef {
    pub segment: SegmentIndex,
    pub marker: usize,
}

impl Segment {
    /// Creates a new detached segment owning the given markers.
    pub fn new(markers: Vec<Marker>) -> Self {
        Segment {
            markers,
            parent: None,
            children: Vec::new(),
            attachment: None,
        }
    }

    /// Returns a detached copy of this segment: same markers, no links.
    pub fn detached_copy(&self) -> Self {
        Segment::new(self.markers.clone())
    }

    /// Returns the markers of this segment.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Returns the number of markers.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Returns `true` if the segment holds no markers.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Returns the first marker, if any.
    pub fn first(&self) -> Option<&Marker> {
        self.markers.first()
    }

    /// Returns the last marker, if any.
    pub fn last(&self) -> Option<&Marker> {
        self.markers.last()
    }

    /// Returns the summed distance between consecutive markers.
    pub fn length(&self) -> f64 {
        self.markers.windows(2).map(|w| w[0].distance(&w[1])).sum()
    }

    /// Reverses the marker order in place.
    pub fn reverse(&mut self) {
        self.markers.reverse();
    }

    /// Moves the first `count` markers out into a new detached segment.
    ///
    /// The remaining markers stay on `self`; links are not touched.
    ///
    /// # Panics
    /// Panics if `count` exceeds the number of markers.
    pub fn split_off_front(&mut self, count: usize) -> Segment {
        let rest = self.markers.split_off(count);
        let front = std::mem::replace(&mut self.markers, rest);
        Segment::new(front)
    }

    /// Returns the parent index, `None` if root or detached.
    pub fn parent(&self) -> Option<SegmentIndex> {
        self.parent
    }

    /// Sets (or clears) the parent index.
    pub fn set_parent(&mut self, parent: Option<SegmentIndex>) {
        self.parent = parent;
    }

    /// Returns the child indices in insertion order.
    pub fn children(&self) -> &[SegmentIndex] {
        &self.children
    }

    /// Returns `true` if this segment has no children.
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }

    /// Adds a child index unless already present.
    pub fn add_child(&mut self, child: SegmentIndex) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    /// Removes a child index, returning whether it was present.
    pub fn remove_child(&mut self, child: SegmentIndex) -> bool {
        match self.children.iter().position(|&c| c == child) {
            Some(pos) => {
                self.children.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replaces child `old` with `new` at the same position.
    ///
    /// Returns `false` if `old` was not a child.
    pub fn replace_child(&mut self, old: SegmentIndex, new: SegmentIndex) -> bool {
        match self.children.iter().position(|&c| c == old) {
            Some(pos) => {
                self.children[pos] = new;
                true
            }
            None => false,
        }
    }

    /// Clears parent, children and attachment.
    pub fn clear_links(&mut self) {
        self.parent = None;
        self.children.clear();
        self.attachment = None;
    }

    /// Returns the parent marker the first marker hangs off, if set.
    pub fn attachment(&self) -> Option<MarkerRef> {
        self.attachment
    }

    /// Sets (or clears) the attachment marker.
    pub fn set_attachment(&mut self, attachment: Option<MarkerRef>) {
        self.attachment = attachment;
    }
}
