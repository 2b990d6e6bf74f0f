//! The composite tree and its consensus resolution.
//!
//! A [Composite] merges several reconstructions of the same branching
//! structure. It holds two layers over one arena of [CompositeBranch]es:
//! - the *candidate graph*: every [Connection] any reconstruction voted for,
//!   with accumulated confidence;
//! - the *resolved tree*: one parent per branch, stored in the branches'
//!   segments.
//!
//! # Workflow
//! 1. Seed with [Composite::add_first_reconstruction].
//! 2. Merge further reconstructions with [Composite::add_reconstruction]
//!    (precomputed [SegmentCorrespondence]s) or [Composite::incorporate]
//!    (through a [BranchMatcher]).
//! 3. Resolve with [Composite::generate_consensus], which works on a copy and
//!    returns a [Consensus].
//!
//! # Example
//! ```
//! use arbor_consensus::composite::{Composite, SegmentCorrespondence};
//! use arbor_consensus::model::{Marker, Reconstruction, Segment, SegmentTree};
//!
//! fn straight(id: usize) -> Reconstruction {
//!     let mut tree = SegmentTree::new();
//!     let line = |x: f64| -> Vec<Marker> { (0..3).map(|k| Marker::new(x, k as f64, 0.0)).collect() };
//!     let root = tree.add_root(Segment::new(line(0.0)));
//!     tree.add_child(root, Segment::new(line(1.0)));
//!     Reconstruction::new(id, tree)
//! }
//!
//! let mut composite = Composite::new();
//! composite.add_first_reconstruction(&straight(0))?;
//! let correspondences = [SegmentCorrespondence::new(0, 0), SegmentCorrespondence::new(1, 1)];
//! composite.add_reconstruction(&straight(1), &correspondences)?;
//!
//! let consensus = composite.generate_consensus(0.5)?;
//! assert_eq!(consensus.summary().resolved, 2);
//! assert_eq!(consensus.to_segment_tree().num_segments(), 2);
//! # Ok::<(), arbor_consensus::Error>(())
//! ```

mod branch;
mod connection;
mod consensus;
mod diagnostics;
mod graph;
mod ingest;

pub use branch::{BranchMatch, CompositeBranch};
pub use connection::{BranchEnd, Connection, ConnectionIndex};
pub use consensus::{Consensus, ConsensusOptions, ConsensusSummary};
pub use graph::{BranchIndex, Composite, ReconstructionInfo};
pub use ingest::{BranchMatcher, SegmentCorrespondence};
