//! Bottom-up roll-ups over a profile tree.
//!
//! Results live in side tables indexed by node id and are recomputed from
//! scratch for every comparison; nothing here mutates a tree.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use rayon::prelude::*;
use render_profile_protocol::{Percent, SharedStr};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::merge::{MergedId, MergedTree};
use crate::model::{NodeId, ProfileTree};

/// Roll-up of one metric over one node's subtree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    /// Subtree sum of self contributions.
    pub sum: f64,
    /// The node's own contribution (zero when it does not report the metric).
    pub self_value: f64,
    /// Smallest self contribution among reporting nodes in the subtree.
    pub min: f64,
    pub max: f64,
    /// Number of nodes in the subtree that report the metric.
    pub count: u32,
    pub pct_of_parent: Percent,
    pub pct_of_total: Percent,
}

impl MetricStats {
    /// Mean self contribution over the reporting nodes.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / f64::from(self.count)
        }
    }
}

/// Every metric roll-up for one node. Metrics no node in the subtree reports
/// are absent, not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub metrics: BTreeMap<SharedStr, MetricStats>,
}

impl AggregateResult {
    pub fn get(&self, metric: &str) -> Option<&MetricStats> {
        self.metrics.get(metric)
    }

    pub fn sum(&self, metric: &str) -> Option<f64> {
        self.get(metric).map(|s| s.sum)
    }
}

/// Aggregates for one `ProfileTree`, indexed by `NodeId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeAggregates {
    results: Vec<AggregateResult>,
}

impl TreeAggregates {
    pub fn get(&self, id: NodeId) -> &AggregateResult {
        &self.results[id.index()]
    }

    pub fn metric(&self, id: NodeId, metric: &str) -> Option<&MetricStats> {
        self.results.get(id.index())?.get(metric)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Roll up `metrics` over every subtree of `tree`.
///
/// Levels are processed deepest first; within a level every node only reads
/// its children's finished results, so a level is computed on the rayon pool
/// when the tree exceeds `config.parallel_threshold` nodes. Children are
/// always summed in child order, which keeps the floating point results
/// identical whichever way a level was scheduled.
pub fn aggregate(
    tree: &ProfileTree,
    metrics: &BTreeSet<SharedStr>,
    config: &EngineConfig,
) -> TreeAggregates {
    let parallel = tree.len() > config.parallel_threshold;
    let mut levels: Vec<Vec<NodeId>> = Vec::new();
    for (id, node) in tree.depth_first() {
        let depth = node.depth() as usize;
        if levels.len() <= depth {
            levels.resize_with(depth + 1, Vec::new);
        }
        levels[depth].push(id);
    }

    let mut results = vec![AggregateResult::default(); tree.len()];
    for level in levels.iter().rev() {
        let computed: Vec<(NodeId, AggregateResult)> = if parallel {
            level
                .par_iter()
                .map(|&id| (id, roll_up(tree, id, metrics, &results)))
                .collect()
        } else {
            level
                .iter()
                .map(|&id| (id, roll_up(tree, id, metrics, &results)))
                .collect()
        };
        for (id, result) in computed {
            results[id.index()] = result;
        }
    }

    fill_percentages(tree, &mut results);
    log::debug!(
        "aggregated {} metrics over {} nodes ({} levels, parallel: {parallel})",
        metrics.len(),
        tree.len(),
        levels.len()
    );
    TreeAggregates { results }
}

fn roll_up(
    tree: &ProfileTree,
    id: NodeId,
    metrics: &BTreeSet<SharedStr>,
    done: &[AggregateResult],
) -> AggregateResult {
    let node = tree.node(id);
    let mut out = BTreeMap::new();
    for metric in metrics {
        let own = node.self_value(metric);
        let mut stats = own.map(|value| MetricStats {
            sum: value,
            self_value: value,
            min: value,
            max: value,
            count: 1,
            pct_of_parent: Percent::Undefined,
            pct_of_total: Percent::Undefined,
        });
        for child in node.children() {
            let Some(child_stats) = done[child.index()].get(metric) else {
                continue;
            };
            stats = Some(match stats {
                Some(mut acc) => {
                    acc.sum += child_stats.sum;
                    acc.min = acc.min.min(child_stats.min);
                    acc.max = acc.max.max(child_stats.max);
                    acc.count += child_stats.count;
                    acc
                }
                None => MetricStats {
                    sum: child_stats.sum,
                    self_value: 0.0,
                    min: child_stats.min,
                    max: child_stats.max,
                    count: child_stats.count,
                    pct_of_parent: Percent::Undefined,
                    pct_of_total: Percent::Undefined,
                },
            });
        }
        if let Some(stats) = stats {
            out.insert(metric.clone(), stats);
        }
    }
    AggregateResult { metrics: out }
}

/// Top-down pass; pre-order ids guarantee the parent is finished first.
fn fill_percentages(tree: &ProfileTree, results: &mut [AggregateResult]) {
    let totals: BTreeMap<SharedStr, f64> = results
        .first()
        .map(|root| {
            root.metrics
                .iter()
                .map(|(name, stats)| (name.clone(), stats.sum))
                .collect()
        })
        .unwrap_or_default();

    for index in 0..results.len() {
        let parent = tree.node(NodeId(index as u32)).parent();
        let parent_sums: Option<BTreeMap<SharedStr, f64>> = parent.map(|p| {
            results[p.index()]
                .metrics
                .iter()
                .map(|(name, stats)| (name.clone(), stats.sum))
                .collect()
        });
        for (name, stats) in &mut results[index].metrics {
            let total = totals.get(name).copied().unwrap_or(0.0);
            stats.pct_of_total = Percent::of(stats.sum, total);
            stats.pct_of_parent = match &parent_sums {
                Some(sums) => Percent::of(stats.sum, sums.get(name).copied().unwrap_or(0.0)),
                None => stats.pct_of_total,
            };
        }
    }
}

/// Cross-slot spread of one metric's subtree sum at one merged node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlotSpread {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Number of present slots that report the metric.
    pub count: u32,
}

/// Per-slot aggregates of a merged tree plus the spread across slots.
#[derive(Debug, Clone, Serialize)]
pub struct MergedAggregates {
    per_slot: Vec<TreeAggregates>,
    spread: Vec<BTreeMap<SharedStr, SlotSpread>>,
}

impl MergedAggregates {
    pub fn slot(&self, slot: usize) -> Option<&TreeAggregates> {
        self.per_slot.get(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.per_slot.len()
    }

    pub fn node_count(&self) -> usize {
        self.spread.len()
    }

    pub fn spread(&self, id: MergedId) -> &BTreeMap<SharedStr, SlotSpread> {
        &self.spread[id.index()]
    }

    /// The aggregate of `slot`'s node behind merged node `id`, if present.
    pub fn result<'a>(
        &'a self,
        merged: &MergedTree,
        id: MergedId,
        slot: usize,
    ) -> Option<&'a AggregateResult> {
        let node_id = merged.node(id).slot(slot)?;
        Some(self.per_slot.get(slot)?.get(node_id))
    }

    /// Whether these aggregates were computed for a tree shaped like `merged`.
    pub fn matches(&self, merged: &MergedTree) -> bool {
        self.per_slot.len() == merged.slot_count()
            && self.spread.len() == merged.len()
            && self
                .per_slot
                .iter()
                .zip(merged.profiles())
                .all(|(aggregates, tree)| aggregates.len() == tree.len())
    }
}

/// Aggregate every input of `merged`, one tree per rayon task, then compute
/// the cross-slot spread for each merged node.
pub fn aggregate_merged(
    merged: &MergedTree,
    metrics: &BTreeSet<SharedStr>,
    config: &EngineConfig,
) -> MergedAggregates {
    let per_slot: Vec<TreeAggregates> = merged
        .profiles()
        .par_iter()
        .map(|tree| aggregate(tree, metrics, config))
        .collect();

    let spread = merged
        .ids()
        .map(|id| {
            let node = merged.node(id);
            let mut out = BTreeMap::new();
            for metric in metrics {
                let sums: Vec<f64> = (0..merged.slot_count())
                    .filter_map(|slot| {
                        let node_id = node.slot(slot)?;
                        per_slot[slot].metric(node_id, metric).map(|s| s.sum)
                    })
                    .collect();
                if sums.is_empty() {
                    continue;
                }
                let total: f64 = sums.iter().sum();
                out.insert(
                    metric.clone(),
                    SlotSpread {
                        mean: total / sums.len() as f64,
                        min: sums.iter().copied().fold(f64::INFINITY, f64::min),
                        max: sums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                        count: sums.len() as u32,
                    },
                );
            }
            out
        })
        .collect();

    MergedAggregates { per_slot, spread }
}
