//! Arbor-consensus is a library to merge independently reconstructed
//! branching structures into one confidence-voted consensus tree.
//!
//! Each input is a rooted tree of polyline segments (a neuron or vessel
//! skeleton, a root system, ...). The inputs are merged into a
//! [Composite](crate::composite::Composite) that keeps, for every branch,
//! how many reconstructions agree it exists and which parents they attach
//! it to. A majority consensus then discards low-confidence branches and
//! reconciles the remaining votes into a single valid tree.
//! Core functionality provided:
//! - Model: [Marker](crate::model::Marker), [Segment](crate::model::Segment),
//!   [SegmentTree](crate::model::SegmentTree) and
//!   [Reconstruction](crate::model::Reconstruction), all arena based
//!   (indices instead of references). See [crate::model].
//! - Composite: seeding from a first reconstruction, merging further ones
//!   through matcher verdicts, confidence bookkeeping, branch splitting,
//!   deep copy. See [crate::composite].
//! - Consensus: thresholding, greedy highest-weight-first resolution with
//!   conflict splits, rescue of removed parents, reattachment of floating
//!   subtrees; summarized in a
//!   [ConsensusSummary](crate::composite::ConsensusSummary).
//! - Diagnostics: connection entropy, direction certainty and per-branch
//!   confidence maps for visualization overlays.
//!
//! Limitations:
//! - Branch matching (deciding which segment of a new reconstruction is
//!   which composite branch) is not part of this crate; plug a matcher in
//!   through [BranchMatcher](crate::composite::BranchMatcher)
//! - No file formats; consensus trees are `serde`-serializable instead
//!
//! # Usage patterns
//! 1. The quick function [consensus_of] merges a slice of reconstructions
//!    with a matcher and resolves them at a threshold.
//! 2. Drive a [Composite](crate::composite::Composite) yourself and call
//!    [generate_consensus_with](crate::composite::Composite::generate_consensus_with)
//!    with [ConsensusOptions](crate::composite::ConsensusOptions) for full
//!    control (rescue, cancellation), possibly repeatedly at different
//!    thresholds.
//!
//! ## Example Configuration
//! ```no_run
//! use arbor_consensus::composite::{Composite, ConsensusOptions};
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn run(composite: &Composite) -> arbor_consensus::Result<()> {
//! let cancel = Arc::new(AtomicBool::new(false));
//! let options = ConsensusOptions::new(2.0)       // at least 2 votes
//!     .with_rescue(false)                        // never reinstate removed parents
//!     .with_cancellation(Arc::clone(&cancel));
//!
//! let consensus = composite.generate_consensus_with(&options)?;
//! println!("{}", consensus.to_segment_tree());
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//! The crate emits [tracing] events and spans but never installs a
//! subscriber; that is up to the application.

pub mod composite;
pub mod error;
pub mod model;

pub use error::{Error, Result};

use crate::composite::{BranchMatcher, Composite, Consensus};
use crate::model::Reconstruction;

// ============================================================================
// Quick Consensus API
// ============================================================================
/// Merges `reconstructions` in order into a new [Composite], using `matcher`
/// for every reconstruction after the first.
///
/// # Errors
/// [Error::NoReconstructions] if `reconstructions` is empty, otherwise any
/// error of [Composite::incorporate].
pub fn composite_of<M: BranchMatcher + ?Sized>(
    reconstructions: &[Reconstruction],
    matcher: &mut M,
) -> Result<Composite> {
    if reconstructions.is_empty() {
        return Err(Error::NoReconstructions);
    }
    let mut composite = Composite::new();
    for reconstruction in reconstructions {
        composite.incorporate(reconstruction, matcher)?;
    }
    Ok(composite)
}

/// Merges `reconstructions` and generates their consensus at `threshold`
/// with default options.
///
/// See [composite_of] and [Composite::generate_consensus].
pub fn consensus_of<M: BranchMatcher + ?Sized>(
    reconstructions: &[Reconstruction],
    matcher: &mut M,
    threshold: f64,
) -> Result<Consensus> {
    composite_of(reconstructions, matcher)?.generate_consensus(threshold)
}
