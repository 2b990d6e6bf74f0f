//! Geometric data model shared by input reconstructions and consensus output.
//!
//! # Tree representation
//! Trees are represented by [SegmentTree], which uses the arena pattern to
//! store [Segment]s, referenced by [SegmentIndex]. A segment is an
//! unbranched polyline of [Marker]s; branching happens only between
//! segments, with children hanging off their parent's last marker.
//!
//! # Inputs
//! Each independently produced tree is wrapped in a [Reconstruction],
//! which adds an id and a vote weight. Reconstructions are read-only inputs:
//! a [Composite](crate::composite::Composite) copies the markers it needs.

pub mod marker;
pub mod reconstruction;
pub mod segment;
pub mod tree;

pub use marker::{Marker, Radius};
pub use reconstruction::{Reconstruction, ReconstructionId};
pub use segment::{MarkerRef, Segment, SegmentIndex};
pub use tree::SegmentTree;
