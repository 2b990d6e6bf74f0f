use arbor_consensus::composite::{Composite, SegmentCorrespondence};
use arbor_consensus::model::{Marker, Reconstruction, Segment, SegmentTree};
use criterion::{Criterion, criterion_group, criterion_main};

const REGRESSION_SIZES: &[(&str, usize, usize)] = &[
    ("binary-63x5", 63, 5),
    ("binary-255x5", 255, 5),
    ("binary-255x20", 255, 20),
];

const REPORTING_SIZES: &[(&str, usize, usize)] = &[("binary-1023x20", 1023, 20)];

/// Complete binary tree of `num_segments` segments with 8 markers each.
fn binary_tree(num_segments: usize) -> SegmentTree {
    let mut tree = SegmentTree::with_capacity(num_segments);
    for i in 0..num_segments {
        let markers = (0..8).map(|k| Marker::new(i as f64, k as f64, 0.0)).collect();
        if i == 0 {
            tree.add_root(Segment::new(markers));
        } else {
            tree.add_child((i - 1) / 2, Segment::new(markers));
        }
    }
    tree
}

/// Composite where reconstruction `r` misses every segment whose index is
/// divisible by `r + 2`, so confidences and candidate votes vary.
fn synthetic_composite(num_segments: usize, num_reconstructions: usize) -> Composite {
    let mut composite = Composite::new();
    composite
        .add_first_reconstruction(&Reconstruction::new(0, binary_tree(num_segments)))
        .unwrap();

    for r in 1..num_reconstructions {
        let tree = binary_tree(num_segments);
        let correspondences: Vec<SegmentCorrespondence> = tree
            .pre_order_iter()
            .map(|(s, _)| s)
            .filter(|s| s % (r + 2) != 0)
            .filter_map(|s| composite.branch_for_segment(0, s).map(|b| SegmentCorrespondence::new(s, b)))
            .collect();
        composite
            .add_reconstruction(&Reconstruction::new(r, tree), &correspondences)
            .unwrap();
    }
    composite
}

fn consensus_generation(c: &mut Criterion) {
    for (name, num_segments, num_reconstructions) in REGRESSION_SIZES {
        let composite = synthetic_composite(*num_segments, *num_reconstructions);
        c.bench_function(name, |b| {
            b.iter(|| composite.generate_consensus(0.5).unwrap());
        });
    }
}

fn consensus_reporting(c: &mut Criterion) {
    for (name, num_segments, num_reconstructions) in REPORTING_SIZES {
        let composite = synthetic_composite(*num_segments, *num_reconstructions);
        c.bench_function(name, |b| {
            b.iter(|| composite.generate_consensus(0.5).unwrap());
        });
    }
}

criterion_group!(regression, consensus_generation);
criterion_group! {
    name = reporting;
    config = Criterion::default().sample_size(10);
    targets = consensus_reporting
}
criterion_main!(regression, reporting);
