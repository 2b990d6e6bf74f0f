//! Error types for composite construction and consensus generation.
//!
//! All fallible operations return [Result], with [Error] describing
//! input contract violations. Degenerate statistics (no recorded evidence)
//! are not errors; they are reported as `None` by the respective getters.

use crate::composite::BranchIndex;
use crate::model::{ReconstructionId, SegmentIndex};
use thiserror::Error;

/// Result type for composite and consensus operations.
pub type Result<T> = std::result::Result<T, Error>;

// =#========================================================================#=
// ERROR
// =#========================================================================#=
/// Errors that can occur while building a composite or resolving its consensus.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Split point is not strictly inside the segment (first and last marker excluded).
    #[error("split point {split_point} out of range for branch {branch} with {len} markers")]
    SplitOutOfRange {
        branch: BranchIndex,
        split_point: usize,
        len: usize,
    },

    /// Segment has fewer markers than the operation needs.
    #[error("segment has {len} markers, at least {required} required")]
    SegmentTooShort { len: usize, required: usize },

    /// Branch index does not exist in the composite.
    #[error("unknown branch {0}")]
    UnknownBranch(BranchIndex),

    /// Connection from a branch to itself.
    #[error("branch {0} cannot connect to itself")]
    SelfConnection(BranchIndex),

    /// Segment index does not exist in the reconstruction tree.
    #[error("unknown segment {segment} in reconstruction {reconstruction}")]
    UnknownSegment {
        reconstruction: ReconstructionId,
        segment: SegmentIndex,
    },

    /// Reconstruction id is not registered with the composite.
    #[error("unknown reconstruction {0}")]
    UnknownReconstruction(ReconstructionId),

    /// A segment or a branch was named by more than one correspondence.
    #[error("duplicate correspondence for segment {segment} / branch {branch}")]
    DuplicateCorrespondence {
        segment: SegmentIndex,
        branch: BranchIndex,
    },

    /// Reconstruction id was already merged into the composite.
    #[error("reconstruction {0} already merged")]
    DuplicateReconstruction(ReconstructionId),

    /// First reconstruction was added to a composite that already holds one.
    #[error("composite already initialized with {0} reconstruction(s)")]
    AlreadyInitialized(usize),

    /// Reconstruction tree has no root and thus nothing to ingest.
    #[error("reconstruction {0} has no root segment")]
    EmptyReconstruction(ReconstructionId),

    /// Reconstruction tree breaks the segment tree invariants (dangling or
    /// inconsistent links, unreachable segments, cycles).
    #[error("reconstruction {0} has an invalid segment tree")]
    InvalidTree(ReconstructionId),

    /// Operation needs at least one reconstruction.
    #[error("composite holds no reconstructions")]
    NoReconstructions,

    /// Threshold is negative or not finite.
    #[error("invalid branch confidence threshold {0}")]
    InvalidThreshold(f64),

    /// Confidence (vote weight) is non-positive or not finite.
    #[error("invalid confidence {0}")]
    InvalidConfidence(f64),

    /// Marker radius is negative or not finite.
    #[error("invalid marker radius {0}")]
    InvalidRadius(f64),

    /// Consensus generation was cancelled through its cancellation flag.
    #[error("consensus generation cancelled")]
    Cancelled,
}
