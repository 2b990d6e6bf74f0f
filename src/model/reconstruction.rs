//! One input tree to be merged into a composite.

use crate::error::{Error, Result};
use crate::model::tree::SegmentTree;

/// Identifier of a reconstruction within a composite.
pub type ReconstructionId = usize;

/// A complete, independently produced reconstruction of the structure.
///
/// `confidence` is the weight of this reconstruction's votes. With the
/// default of `1.0` every confidence in the composite is a plain vote count.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    id: ReconstructionId,
    name: Option<String>,
    confidence: f64,
    tree: SegmentTree,
}

impl Reconstruction {
    /// Creates a reconstruction with unit confidence.
    pub fn new(id: ReconstructionId, tree: SegmentTree) -> Self {
        Reconstruction {
            id,
            name: tree.name().cloned(),
            confidence: 1.0,
            tree,
        }
    }

    /// Sets the vote weight of this reconstruction.
    ///
    /// # Errors
    /// [Error::InvalidConfidence] if `confidence` is not finite and positive.
    pub fn with_confidence(mut self, confidence: f64) -> Result<Self> {
        if !(confidence.is_finite() && confidence > 0.0) {
            return Err(Error::InvalidConfidence(confidence));
        }
        self.confidence = confidence;
        Ok(self)
    }

    /// Attaches a name to this reconstruction.
    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn id(&self) -> ReconstructionId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn tree(&self) -> &SegmentTree {
        &self.tree
    }
}
