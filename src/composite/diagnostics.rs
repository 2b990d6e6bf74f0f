//! Ambiguity and confidence queries for inspection and visualization.
//!
//! Per-branch queries return `None` when the branch has no recorded evidence.
//! The map-valued queries are keyed by [BranchIndex] and skip such branches.

use crate::composite::connection::{BranchEnd, ConnectionIndex};
use crate::composite::graph::{BranchIndex, Composite};
use std::collections::BTreeMap;

impl Composite {
    /// Shannon entropy (in bits) of the normalized confidences of the
    /// candidate parent connections of `branch`.
    ///
    /// With `end` given, only connections entering `branch` at that end are
    /// considered. A single candidate gives 0; `k` equally likely ones give
    /// `log2(k)`.
    ///
    /// # Returns
    /// `None` if `branch` is unknown or has no (matching) candidates.
    pub fn connection_entropy(&self, branch: BranchIndex, end: Option<BranchEnd>) -> Option<f64> {
        let confidences: Vec<f64> = self
            .get_branch(branch)?
            .parent_connections
            .iter()
            .map(|&c| &self.connections[c])
            .filter(|c| end.is_none_or(|e| c.child_end() == e))
            .map(|c| c.confidence())
            .collect();

        let total: f64 = confidences.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let entropy = confidences
            .iter()
            .map(|c| c / total)
            .filter(|&p| p > 0.0)
            .map(|p| -p * p.log2())
            .sum::<f64>();
        Some(entropy.max(0.0))
    }

    /// Returns the best candidate connection of `branch` together with its
    /// share of the branch's `combined_connection_weight`.
    pub fn best_connection_probability(&self, branch: BranchIndex) -> Option<(ConnectionIndex, f64)> {
        let b = self.get_branch(branch)?;
        let best = b.best_connection?;
        if b.combined_connection_weight <= 0.0 {
            return None;
        }
        Some((best, self.connections[best].confidence() / b.combined_connection_weight))
    }

    /// Estimates which end of `branch` is proximal (faces its parent).
    ///
    /// Sums candidate confidence per entry end and returns the heavier end
    /// with certainty `|top - bottom| / (top + bottom)`. Equal weights favor
    /// [BranchEnd::Top] with certainty 0.
    pub fn direction_certainty(&self, branch: BranchIndex) -> Option<(BranchEnd, f64)> {
        let (mut top, mut bottom) = (0.0, 0.0);
        for &c in &self.get_branch(branch)?.parent_connections {
            let connection = &self.connections[c];
            match connection.child_end() {
                BranchEnd::Top => top += connection.confidence(),
                BranchEnd::Bottom => bottom += connection.confidence(),
            }
        }

        let total = top + bottom;
        if total <= 0.0 {
            return None;
        }
        let end = if bottom > top { BranchEnd::Bottom } else { BranchEnd::Top };
        Some((end, (top - bottom).abs() / total))
    }

    /// Normalized confidence of every branch with evidence.
    pub fn segment_confidences(&self) -> BTreeMap<BranchIndex, f64> {
        self.branches
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.confidence().map(|c| (i, c)))
            .collect()
    }

    /// Summed match confidence (weighted vote count) of every branch with evidence.
    pub fn segment_confidence_counts(&self) -> BTreeMap<BranchIndex, f64> {
        self.branches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.confidence_denominator() > 0.0)
            .map(|(i, b)| (i, b.summed_confidence()))
            .collect()
    }

    /// Confidence of each branch's parent connection, as a fraction of the
    /// total reconstruction weight.
    ///
    /// Uses the resolved connection if set, otherwise the best candidate.
    pub fn connection_confidences(&self) -> BTreeMap<BranchIndex, f64> {
        let total = self.total_reconstruction_confidence();
        if total <= 0.0 {
            return BTreeMap::new();
        }
        self.connection_confidence_counts()
            .into_iter()
            .map(|(i, c)| (i, c / total))
            .collect()
    }

    /// Raw (summed) confidence of each branch's resolved or best parent connection.
    pub fn connection_confidence_counts(&self) -> BTreeMap<BranchIndex, f64> {
        self.branches
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                b.resolved_connection
                    .or(b.best_connection)
                    .map(|c| (i, self.connections[c].confidence()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::branch::CompositeBranch;
    use crate::composite::connection::Connection;
    use crate::model::{Marker, Segment};

    fn composite_with(n: usize) -> Composite {
        let mut composite = Composite::new();
        for i in 0..n {
            let markers = (0..4).map(|k| Marker::new(i as f64, k as f64, 0.0)).collect();
            composite.push_branch(CompositeBranch::new(Segment::new(markers)));
        }
        composite
    }

    #[test]
    fn test_entropy_of_two_equal_candidates_is_one_bit() {
        let mut composite = composite_with(3);
        composite
            .add_connection(Connection::new(2, BranchEnd::Top, 0, BranchEnd::Bottom, 0, 1.0))
            .unwrap();
        composite
            .add_connection(Connection::new(2, BranchEnd::Bottom, 1, BranchEnd::Bottom, 1, 1.0))
            .unwrap();

        let h = composite.connection_entropy(2, None).unwrap();
        assert!((h - 1.0).abs() < 1e-12);
        assert_eq!(composite.connection_entropy(2, Some(BranchEnd::Top)), Some(0.0));
        assert_eq!(composite.connection_entropy(0, None), None);
    }

    #[test]
    fn test_direction_certainty_prefers_heavier_end() {
        let mut composite = composite_with(3);
        composite
            .add_connection(Connection::new(2, BranchEnd::Bottom, 0, BranchEnd::Bottom, 0, 3.0))
            .unwrap();
        composite
            .add_connection(Connection::new(2, BranchEnd::Top, 1, BranchEnd::Bottom, 1, 1.0))
            .unwrap();

        let (end, certainty) = composite.direction_certainty(2).unwrap();
        assert_eq!(end, BranchEnd::Bottom);
        assert!((certainty - 0.5).abs() < 1e-12);

        let (best, p) = composite.best_connection_probability(2).unwrap();
        assert_eq!(composite.connection(best).parent(), Some(0));
        assert!((p - 0.75).abs() < 1e-12);
    }
}
