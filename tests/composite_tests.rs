use arbor_consensus::composite::{
    BranchEnd, BranchMatch, BranchMatcher, Composite, Connection, ConnectionIndex, SegmentCorrespondence,
};
use arbor_consensus::model::{Marker, Reconstruction, Segment, SegmentTree};
use arbor_consensus::{Error, composite_of};
use std::collections::BTreeSet;

fn line(x: f64, n: usize) -> Segment {
    Segment::new((0..n).map(|k| Marker::new(x, k as f64, 0.0)).collect())
}

/// Reconstruction with a root of `root_len` markers and one child per entry
/// of `children`, each with that many markers.
fn star(id: usize, root_len: usize, children: &[usize]) -> Reconstruction {
    let mut tree = SegmentTree::new();
    let root = tree.add_root(line(0.0, root_len));
    for (i, &n) in children.iter().enumerate() {
        tree.add_child(root, line(i as f64 + 1.0, n));
    }
    Reconstruction::new(id, tree)
}

/// Matches every segment to the branch with the same index.
struct IdentityMatcher;

impl BranchMatcher for IdentityMatcher {
    fn match_reconstruction(&mut self, composite: &Composite, reconstruction: &Reconstruction) -> Vec<SegmentCorrespondence> {
        (0..reconstruction.tree().num_segments())
            .filter(|&s| s < composite.num_branches())
            .map(|s| SegmentCorrespondence::new(s, s))
            .collect()
    }
}

fn parent_connections(composite: &Composite, branch: usize) -> BTreeSet<ConnectionIndex> {
    composite.branch(branch).parent_connections().iter().copied().collect()
}

// ============= Seeding Tests =============

#[test]
fn test_first_reconstruction_mirrors_tree() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 4, &[3, 3])).unwrap();

    assert_eq!(composite.num_branches(), 3);
    assert_eq!(composite.num_reconstructions(), 1);
    assert_eq!(composite.root(), Some(0));
    assert_eq!(composite.branch(0).children(), &[1, 2]);
    assert!(composite.validate_tree());

    for b in 0..3 {
        assert_eq!(composite.branch(b).confidence(), Some(1.0));
        assert_eq!(composite.branch(b).parent_connections().len(), 1);
    }

    let root_connection = composite.connection(composite.branch(0).best_connection().unwrap());
    assert!(root_connection.is_root());
    let child_connection = composite.connection(composite.branch(2).best_connection().unwrap());
    assert_eq!(child_connection.parent(), Some(0));
    assert_eq!(child_connection.child_end(), BranchEnd::Top);
    assert_eq!(child_connection.parent_end(), BranchEnd::Bottom);
    assert_eq!(composite.branch_for_segment(0, 2), Some(2));
}

#[test]
fn test_first_reconstruction_errors() {
    let mut composite = Composite::new();
    let empty = Reconstruction::new(0, SegmentTree::new());
    assert_eq!(composite.add_first_reconstruction(&empty), Err(Error::EmptyReconstruction(0)));

    let mut tree = SegmentTree::new();
    tree.add_root(Segment::new(Vec::new()));
    let hollow = Reconstruction::new(0, tree);
    assert!(matches!(
        composite.add_first_reconstruction(&hollow),
        Err(Error::SegmentTooShort { len: 0, .. })
    ));

    composite.add_first_reconstruction(&star(0, 3, &[])).unwrap();
    assert_eq!(
        composite.add_first_reconstruction(&star(1, 3, &[])),
        Err(Error::AlreadyInitialized(1))
    );
}

#[test]
fn test_malformed_tree_is_rejected() {
    // Dangling child index
    let mut json = serde_json::to_value(star(0, 3, &[3]).tree()).unwrap();
    json["segments"][0]["children"] = serde_json::json!([1, 7]);
    let dangling: SegmentTree = serde_json::from_value(json).unwrap();
    assert!(!dangling.is_valid());

    let mut composite = Composite::new();
    assert_eq!(
        composite.add_first_reconstruction(&Reconstruction::new(3, dangling)),
        Err(Error::InvalidTree(3))
    );
    assert_eq!(composite.num_branches(), 0);
    assert_eq!(composite.num_reconstructions(), 0);

    // Segment listed as its own child
    let mut json = serde_json::to_value(star(1, 3, &[3]).tree()).unwrap();
    json["segments"][1]["children"] = serde_json::json!([1]);
    let cyclic: SegmentTree = serde_json::from_value(json).unwrap();

    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    assert_eq!(
        composite.add_reconstruction(&Reconstruction::new(1, cyclic), &[SegmentCorrespondence::new(0, 0)]),
        Err(Error::InvalidTree(1))
    );
    assert_eq!(composite.num_branches(), 2);
    assert_eq!(composite.num_reconstructions(), 1);
}

#[test]
fn test_reconstruction_lookup() {
    let mut composite = Composite::new();
    let named = star(4, 3, &[]).with_name("tracer-b".to_string());
    composite.add_first_reconstruction(&named).unwrap();

    let info = composite.reconstruction(4).unwrap();
    assert_eq!(info.name.as_deref(), Some("tracer-b"));
    assert_eq!(info.confidence, 1.0);
    assert_eq!(composite.reconstruction(0).err(), Some(Error::UnknownReconstruction(0)));
}

// ============= Ingestion Tests =============

#[test]
fn test_add_reconstruction_before_seeding_fails() {
    let mut composite = Composite::new();
    let result = composite.add_reconstruction(&star(0, 3, &[]), &[]);
    assert_eq!(result, Err(Error::NoReconstructions));
}

#[test]
fn test_add_reconstruction_rejects_bad_correspondences() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    let second = star(1, 3, &[3]);

    let duplicate = [SegmentCorrespondence::new(0, 0), SegmentCorrespondence::new(1, 0)];
    assert!(matches!(
        composite.add_reconstruction(&second, &duplicate),
        Err(Error::DuplicateCorrespondence { .. })
    ));
    assert_eq!(
        composite.add_reconstruction(&second, &[SegmentCorrespondence::new(0, 9)]),
        Err(Error::UnknownBranch(9))
    );
    assert!(matches!(
        composite.add_reconstruction(&second, &[SegmentCorrespondence::new(5, 0)]),
        Err(Error::UnknownSegment { reconstruction: 1, segment: 5 })
    ));
    assert_eq!(
        composite.add_reconstruction(&second, &[SegmentCorrespondence::new(0, 0).with_confidence(0.0)]),
        Err(Error::InvalidConfidence(0.0))
    );

    // Nothing was registered by the failed attempts
    assert_eq!(composite.num_reconstructions(), 1);
    assert_eq!(composite.num_branches(), 2);

    composite.add_reconstruction(&second, &[SegmentCorrespondence::new(0, 0)]).unwrap();
    assert_eq!(
        composite.add_reconstruction(&second, &[]),
        Err(Error::DuplicateReconstruction(1))
    );
}

#[test]
fn test_unmatched_segments_become_new_branches() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    composite
        .add_reconstruction(&star(1, 3, &[4]), &[SegmentCorrespondence::new(0, 0)])
        .unwrap();

    assert_eq!(composite.num_branches(), 3);
    assert_eq!(composite.branch_for_segment(1, 1), Some(2));

    // Root matched twice; old child missed once; new child missed by the first
    assert_eq!(composite.branch(0).confidence(), Some(1.0));
    assert_eq!(composite.branch(1).confidence(), Some(0.5));
    assert_eq!(composite.branch(2).confidence(), Some(0.5));

    let connection = composite.connection(composite.branch(2).best_connection().unwrap());
    assert_eq!(connection.parent(), Some(0));
    assert_eq!(connection.reconstructions().iter().copied().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn test_reversed_match_derives_connection_ends() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    let correspondences = [
        SegmentCorrespondence::new(0, 0).reversed(),
        SegmentCorrespondence::new(1, 1).reversed(),
    ];
    composite.add_reconstruction(&star(1, 3, &[3]), &correspondences).unwrap();

    let ends: Vec<(BranchEnd, BranchEnd)> = composite
        .branch(1)
        .parent_connections()
        .iter()
        .map(|&c| (composite.connection(c).child_end(), composite.connection(c).parent_end()))
        .collect();
    assert_eq!(ends, vec![(BranchEnd::Top, BranchEnd::Bottom), (BranchEnd::Bottom, BranchEnd::Top)]);
    assert_eq!(composite.branch(1).child_connections(BranchEnd::Top).len(), 0);
    assert_eq!(composite.branch(0).child_connections(BranchEnd::Top).len(), 1);
    assert!(!composite.branch(1).matches()[1].forward);
}

#[test]
fn test_reconstruction_confidence_weights_votes() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    let heavy = star(1, 3, &[]).with_confidence(3.0).unwrap();
    composite
        .add_reconstruction(&heavy, &[SegmentCorrespondence::new(0, 0).with_confidence(0.5)])
        .unwrap();

    assert_eq!(composite.total_reconstruction_confidence(), 4.0);
    assert_eq!(composite.branch(0).summed_confidence(), 2.5);
    assert_eq!(composite.branch(1).confidence(), Some(0.25));
    assert_eq!(composite.branch(0).combined_connection_weight(), 4.0);
}

#[test]
fn test_incorporate_with_matcher() {
    let reconstructions = vec![star(0, 3, &[3]), star(1, 3, &[3]), star(2, 3, &[3, 2])];
    let composite = composite_of(&reconstructions, &mut IdentityMatcher).unwrap();

    assert_eq!(composite.num_reconstructions(), 3);
    assert_eq!(composite.num_branches(), 3);
    assert_eq!(composite.branch(1).summed_confidence(), 3.0);
    let third = composite.branch(2).confidence().unwrap();
    assert!((third - 1.0 / 3.0).abs() < 1e-12);

    assert_eq!(composite_of(&[], &mut IdentityMatcher).err(), Some(Error::NoReconstructions));
}

// ============= Confidence Tests =============

#[test]
fn test_confidence_two_matches_one_miss() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    composite
        .add_reconstruction(&star(1, 3, &[3]), &[SegmentCorrespondence::new(0, 0), SegmentCorrespondence::new(1, 1)])
        .unwrap();
    composite
        .add_reconstruction(&star(2, 3, &[]), &[SegmentCorrespondence::new(0, 0)])
        .unwrap();

    let branch = composite.branch(1);
    assert_eq!(branch.summed_confidence(), 2.0);
    assert_eq!(branch.confidence_denominator(), 3.0);
    assert!((branch.confidence().unwrap() - 2.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_confidence_monotonicity() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[])).unwrap();

    let mut last = composite.branch(0).confidence().unwrap();
    for _ in 0..3 {
        composite.add_branch_miss(0, 0.7).unwrap();
        let now = composite.branch(0).confidence().unwrap();
        assert!(now <= last);
        last = now;
    }
    for _ in 0..3 {
        composite.add_branch_match(0, BranchMatch::whole(0, 0, 3, true, 0.4)).unwrap();
        let now = composite.branch(0).confidence().unwrap();
        assert!(now >= last);
        last = now;
    }

    assert_eq!(composite.add_branch_miss(4, 1.0), Err(Error::UnknownBranch(4)));
    assert_eq!(composite.add_branch_miss(0, -1.0), Err(Error::InvalidConfidence(-1.0)));
}

// ============= Connection Tests =============

#[test]
fn test_add_connection_merges_same_edge() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3, 3])).unwrap();
    let seeded = composite.branch(2).best_connection().unwrap();

    let merged = composite
        .add_connection(Connection::new(2, BranchEnd::Top, 0, BranchEnd::Bottom, 1, 0.5))
        .unwrap();
    assert_eq!(merged, seeded);
    assert_eq!(composite.connection(merged).confidence(), 1.5);
    assert_eq!(composite.branch(2).parent_connections().len(), 1);

    let sibling = composite
        .add_connection(Connection::new(2, BranchEnd::Top, 1, BranchEnd::Bottom, 1, 2.0))
        .unwrap();
    assert_ne!(sibling, seeded);
    assert_eq!(composite.branch(2).best_connection(), Some(sibling));
    assert_eq!(composite.branch(2).combined_connection_weight(), 3.5);
    assert_eq!(composite.branch(1).child_connections(BranchEnd::Bottom), &[sibling]);
}

#[test]
fn test_add_connection_rejects_bad_edges() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();

    let to_self = Connection::new(1, BranchEnd::Top, 1, BranchEnd::Bottom, 0, 1.0);
    assert_eq!(composite.add_connection(to_self), Err(Error::SelfConnection(1)));
    let unknown = Connection::new(1, BranchEnd::Top, 8, BranchEnd::Bottom, 0, 1.0);
    assert_eq!(composite.add_connection(unknown), Err(Error::UnknownBranch(8)));
    let weightless = Connection::new(1, BranchEnd::Top, 0, BranchEnd::Top, 0, 0.0);
    assert_eq!(composite.add_connection(weightless), Err(Error::InvalidConfidence(0.0)));
}

#[test]
fn test_remove_connection_rescans_best() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3, 3])).unwrap();
    let seeded = composite.branch(2).best_connection().unwrap();
    let strong = composite
        .add_connection(Connection::new(2, BranchEnd::Bottom, 1, BranchEnd::Bottom, 1, 4.0))
        .unwrap();
    assert_eq!(composite.branch(2).best_connection(), Some(strong));

    assert!(composite.remove_connection(strong));
    assert_eq!(composite.branch(2).best_connection(), Some(seeded));
    assert_eq!(composite.branch(2).combined_connection_weight(), 1.0);
    assert!(composite.branch(1).child_connections(BranchEnd::Bottom).is_empty());
    assert!(!composite.remove_connection(strong));
}

#[test]
fn test_remove_resolved_connection_clears_it() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    let seeded = composite.branch(1).parent_connections()[0];
    assert_eq!(composite.branch(1).resolved_connection(), Some(seeded));

    assert!(composite.remove_connection(seeded));
    assert_eq!(composite.branch(1).resolved_connection(), None);
    assert_eq!(composite.branch(1).best_connection(), None);
    assert!(!composite.connection_confidence_counts().contains_key(&1));

    // Compaction must not meet a dangling resolved index
    let copy = composite.copy();
    assert_eq!(copy.branch(1).resolved_connection(), None);
    assert_eq!(copy.connection_confidence_counts(), composite.connection_confidence_counts());
    assert_eq!(copy.connection_confidence_counts()[&0], 1.0);
}

// ============= Splitting Tests =============

#[test]
fn test_split_conservation() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 6, &[3])).unwrap();
    composite
        .add_reconstruction(&star(1, 6, &[3]), &[SegmentCorrespondence::new(0, 0), SegmentCorrespondence::new(1, 1)])
        .unwrap();

    let before_split = parent_connections(&composite, 0);
    let confidence = composite.branch(0).confidence();

    let before = composite.split_branch(0, 2).unwrap();
    assert_eq!(before, 2);
    assert_eq!(composite.branch(before).segment().len() + composite.branch(0).segment().len(), 6);
    assert_eq!(composite.branch(before).segment().first().unwrap().y, 0.0);
    assert_eq!(composite.branch(0).segment().first().unwrap().y, 2.0);

    // Pre-split connections are partitioned; only the linking edge is new
    let synthesized: BTreeSet<ConnectionIndex> = parent_connections(&composite, 0)
        .into_iter()
        .filter(|&c| composite.connection(c).parent() == Some(before))
        .collect();
    assert_eq!(synthesized.len(), 1);
    let mut union = parent_connections(&composite, before);
    union.extend(parent_connections(&composite, 0).difference(&synthesized));
    assert_eq!(union, before_split);

    let link = composite.connection(*synthesized.iter().next().unwrap());
    assert_eq!(link.child_end(), BranchEnd::Top);
    assert_eq!(link.parent_end(), BranchEnd::Bottom);
    assert_eq!(link.confidence(), 2.0);

    // Children at the far end keep their parent; evidence is preserved
    assert_eq!(composite.connection(composite.branch(1).best_connection().unwrap()).parent(), Some(0));
    assert_eq!(composite.branch(before).confidence(), confidence);
    assert_eq!(composite.branch(0).confidence(), confidence);
    assert_eq!(composite.branch(before).matches().len(), 2);
    assert_eq!(composite.branch(before).matches()[0].span, 0..2);
    assert_eq!(composite.branch(0).matches()[0].span, 2..6);
}

#[test]
fn test_split_moves_children_at_split_end() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 5, &[3])).unwrap();
    // Child voted to hang off the top of the root
    let top_child = composite
        .add_connection(Connection::new(1, BranchEnd::Bottom, 0, BranchEnd::Top, 0, 1.0))
        .unwrap();

    let before = composite.split_branch(0, 1).unwrap();
    assert_eq!(composite.connection(top_child).parent(), Some(before));
    assert_eq!(composite.branch(before).child_connections(BranchEnd::Top), &[top_child]);
    assert!(composite.branch(0).child_connections(BranchEnd::Top).is_empty());
}

#[test]
fn test_split_carries_resolved_connection() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 5, &[3])).unwrap();
    let root_connection = composite.branch(0).resolved_connection().unwrap();
    let child_connection = composite.branch(1).resolved_connection().unwrap();

    let before = composite.split_branch(0, 2).unwrap();
    assert_eq!(composite.branch(before).resolved_connection(), Some(root_connection));
    assert_eq!(composite.connection(root_connection).child(), before);
    assert_eq!(composite.branch(0).resolved_connection(), None);
    assert_eq!(composite.branch(1).resolved_connection(), Some(child_connection));

    let copy = composite.copy();
    let moved = copy.branch(before).resolved_connection().unwrap();
    assert!(copy.connection(moved).is_root());
    assert_eq!(copy.connection_confidence_counts()[&before], 1.0);
}

#[test]
fn test_split_out_of_range() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 4, &[2])).unwrap();

    for split_point in [0, 3, 4] {
        assert_eq!(
            composite.split_branch(0, split_point),
            Err(Error::SplitOutOfRange { branch: 0, split_point, len: 4 })
        );
    }
    assert!(matches!(composite.split_branch(1, 1), Err(Error::SplitOutOfRange { len: 2, .. })));
    assert_eq!(composite.split_branch(7, 1), Err(Error::UnknownBranch(7)));
    assert_eq!(composite.num_branches(), 2);
}

// ============= Copy Tests =============

#[test]
fn test_copy_isolation() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 5, &[3, 3])).unwrap();
    composite.add_branch_miss(1, 1.0).unwrap();

    let mut copy = composite.copy();
    copy.split_branch(0, 2).unwrap();
    copy.add_branch_miss(2, 5.0).unwrap();
    copy.add_connection(Connection::new(2, BranchEnd::Top, 1, BranchEnd::Bottom, 0, 3.0))
        .unwrap();

    assert_eq!(composite.num_branches(), 3);
    assert_eq!(composite.branch(0).segment().len(), 5);
    assert_eq!(composite.branch(1).confidence(), Some(0.5));
    assert_eq!(composite.branch(2).confidence(), Some(1.0));
    assert_eq!(composite.branch(2).parent_connections().len(), 1);
    assert_eq!(composite.branch(0).children(), &[1, 2]);
    assert!(composite.validate_tree());

    assert_eq!(copy.num_branches(), 4);
    assert_eq!(copy.branch(2).parent_connections().len(), 2);
}

#[test]
fn test_copy_compacts_removed_connections() {
    let mut composite = Composite::new();
    composite.add_first_reconstruction(&star(0, 3, &[3])).unwrap();
    let extra = composite
        .add_connection(Connection::new(1, BranchEnd::Bottom, 0, BranchEnd::Top, 0, 1.0))
        .unwrap();
    composite.remove_connection(extra);

    let copy = composite.copy();
    let kept = copy.branch(1).best_connection().unwrap();
    assert_eq!(copy.connection(kept).parent(), Some(0));
    assert_eq!(copy.connection(kept).parent_end(), BranchEnd::Bottom);
    assert!(copy.branch(0).child_connections(BranchEnd::Top).is_empty());
    assert_eq!(copy.branch(0).child_connections(BranchEnd::Bottom), &[kept]);
}
