//! Property-based tests for the comparison engine.
//!
//! Key invariants:
//! - The root's subtree sum equals the sum of every node's self contribution
//! - Children's percent-of-parent never adds up to more than 100 %
//! - Merging identical trees is isomorphic and diffs to nothing
//! - Aggregation gives identical results with and without the rayon pool
//! - Swapped diffs relate as r_BA = -100 * r_AB / (100 + r_AB)

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use render_profile_core::protocol::{ProfileMeta, RawProfile, RawRecord, Severity, SharedStr};
use render_profile_core::{
    EngineConfig, NodeId, ProfileTree, ThresholdConfig, aggregate, aggregate_merged, build_tree,
    diff, merge,
};

fn node_name() -> impl Strategy<Value = String> {
    // A tiny alphabet so repeated sibling names are common.
    "[a-d]"
}

fn record_with(name: String, time: Option<f64>, children: Vec<RawRecord>) -> RawRecord {
    let mut record = RawRecord::new(name);
    if let Some(time) = time {
        record = record.with_metric("time", time);
    }
    record.children = children;
    record
}

fn record() -> impl Strategy<Value = RawRecord> {
    let leaf = (node_name(), prop::option::of(0.0f64..1000.0))
        .prop_map(|(name, time)| record_with(name, time, Vec::new()));
    leaf.prop_recursive(4, 64, 5, |inner| {
        (
            node_name(),
            prop::option::of(0.0f64..5000.0),
            prop::collection::vec(inner, 0..5),
        )
            .prop_map(|(name, time, children)| record_with(name, time, children))
    })
}

fn tree(root: RawRecord) -> Arc<ProfileTree> {
    let raw = RawProfile {
        meta: ProfileMeta::default(),
        root,
    };
    Arc::new(build_tree(&raw, &EngineConfig::default()).unwrap())
}

fn time() -> BTreeSet<SharedStr> {
    [SharedStr::from("time")].into_iter().collect()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

proptest! {
    /// Root subtree sum equals the sum of all self contributions.
    #[test]
    fn global_conservation(root in record()) {
        let tree = tree(root);
        let aggregates = aggregate(&tree, &time(), &EngineConfig::default());
        let selves: f64 = tree.depth_first().filter_map(|(_, n)| n.self_value("time")).sum();
        match aggregates.metric(tree.root(), "time") {
            Some(stats) => prop_assert!(close(stats.sum, selves), "{} vs {}", stats.sum, selves),
            None => prop_assert_eq!(selves, 0.0),
        }
    }

    /// Children's share of their parent is at most 100 %.
    #[test]
    fn percent_of_parent_is_bounded(root in record()) {
        let tree = tree(root);
        let aggregates = aggregate(&tree, &time(), &EngineConfig::default());
        for (id, node) in tree.depth_first() {
            let Some(parent) = aggregates.metric(id, "time") else { continue };
            if parent.sum == 0.0 {
                continue;
            }
            let share: f64 = node
                .children()
                .iter()
                .filter_map(|&c| aggregates.metric(c, "time"))
                .filter_map(|s| s.pct_of_parent.value())
                .sum();
            prop_assert!(share <= 100.0 + 1e-9, "children share {share}%");
            if parent.self_value == 0.0 {
                prop_assert!(close(share, 100.0), "children share {share}% with zero self");
            }
        }
    }

    /// Merging copies of one tree reproduces it and reports no change.
    #[test]
    fn self_merge_is_identity(root in record(), copies in 1usize..4) {
        let tree = tree(root);
        let trees: Vec<_> = (0..copies).map(|_| Arc::clone(&tree)).collect();
        let output = merge(&trees, 0).unwrap();
        prop_assert!(output.warnings.is_empty());
        prop_assert_eq!(output.tree.len(), tree.len());
        for id in output.tree.ids() {
            prop_assert_eq!(output.tree.node(id).present_count(), copies);
        }

        let aggregates = aggregate_merged(&output.tree, &time(), &EngineConfig::default());
        let diff = diff(&output.tree, &aggregates, 0, &ThresholdConfig::default()).unwrap();
        for id in output.tree.ids() {
            prop_assert_eq!(diff.get(id).subtree_severity, Severity::Negligible);
        }
    }

    /// Level-parallel aggregation matches the sequential pass bit for bit.
    #[test]
    fn parallel_aggregation_is_deterministic(root in record()) {
        let tree = tree(root);
        let sequential = aggregate(&tree, &time(), &EngineConfig {
            parallel_threshold: usize::MAX,
            ..EngineConfig::default()
        });
        let parallel = aggregate(&tree, &time(), &EngineConfig {
            parallel_threshold: 0,
            ..EngineConfig::default()
        });
        prop_assert_eq!(sequential, parallel);
    }

    /// Swapping baseline and candidate changes the relative delta by the
    /// ratio of the two denominators.
    #[test]
    fn swapped_relative_deltas(a in 1.0f64..1e6, b in 1.0f64..1e6) {
        let first = tree(RawRecord::new("frame").with_metric("time", a));
        let second = tree(RawRecord::new("frame").with_metric("time", b));
        let relative = |baseline: usize| {
            let merged = merge(&[Arc::clone(&first), Arc::clone(&second)], baseline).unwrap().tree;
            let aggregates = aggregate_merged(&merged, &time(), &EngineConfig::default());
            let diff = diff(&merged, &aggregates, baseline, &ThresholdConfig::default()).unwrap();
            diff.get(merged.root())
                .metric(1 - baseline, "time")
                .and_then(|d| d.relative.value())
                .unwrap()
        };
        let r_ab = relative(0);
        let r_ba = relative(1);
        prop_assert!(close(r_ba, -100.0 * r_ab / (100.0 + r_ab)), "{r_ba} vs {r_ab}");
    }
}

#[test]
fn root_is_first_node() {
    let tree = tree(RawRecord::new("frame").with_child(RawRecord::new("a")));
    assert_eq!(tree.root(), NodeId(0));
    assert_eq!(tree.node(NodeId(1)).parent(), Some(NodeId(0)));
}
