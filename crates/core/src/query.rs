use std::cmp::Ordering;

use render_profile_protocol::{Severity, Trend};
use serde::{Deserialize, Serialize};

use crate::diff::MergedDiff;
use crate::merge::{MergedId, MergedTree};

/// Criteria a node must meet to appear in a view. Unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilter {
    /// Case-insensitive substring of the node name.
    pub name_contains: Option<String>,
    pub min_severity: Option<Severity>,
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    #[default]
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

/// Orders siblings by the magnitude of one metric's delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub metric: String,
    #[serde(default)]
    pub by: DeltaKind,
    /// Candidate slot to sort by; the first non-baseline slot when unset.
    #[serde(default)]
    pub slot: Option<usize>,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(metric: impl Into<String>, by: DeltaKind) -> Self {
        Self {
            metric: metric.into(),
            by,
            slot: None,
            order: SortOrder::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewNode {
    pub id: MergedId,
    pub children: Vec<ViewNode>,
}

/// Pruned hierarchy over merged node ids. Kept nodes retain their ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryView {
    pub roots: Vec<ViewNode>,
}

impl QueryView {
    /// Ids in display order (pre-order).
    pub fn ids(&self) -> Vec<MergedId> {
        let mut out = Vec::new();
        let mut stack: Vec<&ViewNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node.id);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Read-only search structure over one comparison.
pub struct QueryIndex<'a> {
    merged: &'a MergedTree,
    diff: &'a MergedDiff,
    lowercase_names: Vec<String>,
}

impl<'a> QueryIndex<'a> {
    pub fn new(merged: &'a MergedTree, diff: &'a MergedDiff) -> Self {
        let lowercase_names = merged
            .nodes()
            .iter()
            .map(|node| node.name().to_lowercase())
            .collect();
        Self {
            merged,
            diff,
            lowercase_names,
        }
    }

    /// Filter and sort the comparison tree.
    pub fn query(&self, filter: &QueryFilter, sort: Option<&SortSpec>) -> QueryView {
        let needle = filter.name_contains.as_ref().map(|s| s.to_lowercase());
        let sort = sort.map(|spec| ResolvedSort {
            spec,
            slot: spec.slot.unwrap_or_else(|| self.first_candidate()),
        });
        let roots = self
            .visit(self.merged.root(), filter, needle.as_deref(), sort.as_ref())
            .into_iter()
            .collect();
        QueryView { roots }
    }

    fn first_candidate(&self) -> usize {
        let baseline = self.diff.baseline();
        (0..self.merged.slot_count())
            .find(|&slot| slot != baseline)
            .unwrap_or(baseline)
    }

    fn visit(
        &self,
        id: MergedId,
        filter: &QueryFilter,
        needle: Option<&str>,
        sort: Option<&ResolvedSort<'_>>,
    ) -> Option<ViewNode> {
        let result = self.diff.get(id);
        if filter
            .min_severity
            .is_some_and(|min| result.subtree_severity < min)
        {
            return None;
        }
        if filter
            .trend
            .is_some_and(|trend| !result.subtree_trends.contains(trend))
        {
            return None;
        }

        let mut order: Vec<MergedId> = self.merged.node(id).children().to_vec();
        if let Some(sort) = sort {
            let keys: Vec<Option<f64>> = order.iter().map(|&c| self.sort_key(c, sort)).collect();
            let mut indexed: Vec<usize> = (0..order.len()).collect();
            indexed.sort_by(|&a, &b| compare_keys(keys[a], keys[b], sort.spec.order));
            order = indexed.into_iter().map(|i| order[i]).collect();
        }
        let children: Vec<ViewNode> = order
            .into_iter()
            .filter_map(|child| self.visit(child, filter, needle, sort))
            .collect();

        let own_match = needle.is_none_or(|n| self.lowercase_names[id.index()].contains(n))
            && filter.min_severity.is_none_or(|min| result.severity >= min)
            && filter.trend.is_none_or(|trend| result.trends.contains(trend));

        (own_match || !children.is_empty()).then_some(ViewNode { id, children })
    }

    fn sort_key(&self, id: MergedId, sort: &ResolvedSort<'_>) -> Option<f64> {
        let delta = self.diff.get(id).metric(sort.slot, &sort.spec.metric)?;
        match sort.spec.by {
            DeltaKind::Absolute => delta.absolute.map(f64::abs),
            DeltaKind::Relative => Some(delta.relative.value().map_or(f64::INFINITY, f64::abs)),
        }
    }
}

struct ResolvedSort<'s> {
    spec: &'s SortSpec,
    slot: usize,
}

/// Missing keys go last in both orders.
fn compare_keys(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match order {
            SortOrder::Descending => b.total_cmp(&a),
            SortOrder::Ascending => a.total_cmp(&b),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use render_profile_protocol::{ProfileMeta, RawProfile, RawRecord, SharedStr};

    use super::*;
    use crate::aggregate::aggregate_merged;
    use crate::config::{EngineConfig, ThresholdConfig};
    use crate::diff::diff;
    use crate::merge::merge;
    use crate::model::{ProfileTree, build_tree};

    fn tree(root: RawRecord) -> Arc<ProfileTree> {
        let raw = RawProfile {
            meta: ProfileMeta::default(),
            root,
        };
        Arc::new(build_tree(&raw, &EngineConfig::default()).unwrap_or_else(|e| panic!("{e}")))
    }

    fn compare(baseline: RawRecord, candidate: RawRecord) -> (MergedTree, MergedDiff) {
        let trees = [tree(baseline), tree(candidate)];
        let merged = merge(&trees, 0).unwrap_or_else(|e| panic!("{e}")).tree;
        let metrics: BTreeSet<SharedStr> = trees.iter().flat_map(|t| t.metric_names()).collect();
        let aggregates = aggregate_merged(&merged, &metrics, &EngineConfig::default());
        let diff = diff(&merged, &aggregates, 0, &ThresholdConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        (merged, diff)
    }

    fn scenario() -> (MergedTree, MergedDiff) {
        compare(
            RawRecord::new("root")
                .with_child(RawRecord::new("A").with_metric("time", 60.0))
                .with_child(RawRecord::new("B").with_metric("time", 40.0)),
            RawRecord::new("root")
                .with_child(RawRecord::new("A").with_metric("time", 60.0))
                .with_child(RawRecord::new("B").with_metric("time", 70.0)),
        )
    }

    fn names(merged: &MergedTree, view: &QueryView) -> Vec<String> {
        view.ids()
            .into_iter()
            .map(|id| merged.node(id).name().to_string())
            .collect()
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let (merged, diff) = scenario();
        let index = QueryIndex::new(&merged, &diff);
        let view = index.query(&QueryFilter::default(), None);
        assert_eq!(names(&merged, &view), ["root", "A", "B"]);
        assert_eq!(view.len(), merged.len());
    }

    #[test]
    fn min_severity_keeps_matches_and_ancestors() {
        let (merged, diff) = scenario();
        let index = QueryIndex::new(&merged, &diff);
        let filter = QueryFilter {
            min_severity: Some(Severity::Significant),
            ..QueryFilter::default()
        };
        let view = index.query(&filter, None);
        assert_eq!(names(&merged, &view), ["root", "B"]);
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        let (merged, diff) = compare(
            RawRecord::new("frame").with_child(
                RawRecord::new("MCRT")
                    .with_child(RawRecord::new("Integration").with_metric("time", 1.0))
                    .with_child(RawRecord::new("AOVs").with_metric("time", 1.0)),
            ),
            RawRecord::new("frame"),
        );
        let index = QueryIndex::new(&merged, &diff);
        let filter = QueryFilter {
            name_contains: Some("integ".to_string()),
            ..QueryFilter::default()
        };
        let view = index.query(&filter, None);
        assert_eq!(names(&merged, &view), ["frame", "MCRT", "Integration"]);

        let nothing = QueryFilter {
            name_contains: Some("nope".to_string()),
            ..QueryFilter::default()
        };
        assert!(index.query(&nothing, None).is_empty());
    }

    #[test]
    fn trend_filter_prunes_by_subtree_flags() {
        let (merged, diff) = compare(
            RawRecord::new("root")
                .with_child(RawRecord::new("faster").with_metric("time", 10.0))
                .with_child(RawRecord::new("slower").with_metric("time", 10.0)),
            RawRecord::new("root")
                .with_child(RawRecord::new("faster").with_metric("time", 5.0))
                .with_child(RawRecord::new("slower").with_metric("time", 20.0)),
        );
        let index = QueryIndex::new(&merged, &diff);
        let filter = QueryFilter {
            trend: Some(Trend::Improvement),
            ..QueryFilter::default()
        };
        assert_eq!(names(&merged, &index.query(&filter, None)), ["root", "faster"]);
    }

    #[test]
    fn sorts_siblings_by_delta() {
        let (merged, diff) = compare(
            RawRecord::new("root")
                .with_child(RawRecord::new("small").with_metric("time", 100.0))
                .with_child(RawRecord::new("zero").with_metric("time", 0.0))
                .with_child(RawRecord::new("big").with_metric("time", 10.0))
                .with_child(RawRecord::new("silent")),
            RawRecord::new("root")
                .with_child(RawRecord::new("small").with_metric("time", 90.0))
                .with_child(RawRecord::new("zero").with_metric("time", 1.0))
                .with_child(RawRecord::new("big").with_metric("time", 30.0))
                .with_child(RawRecord::new("silent")),
        );
        let index = QueryIndex::new(&merged, &diff);
        let all = QueryFilter::default();

        let by_abs = SortSpec::new("time", DeltaKind::Absolute);
        assert_eq!(
            names(&merged, &index.query(&all, Some(&by_abs))),
            ["root", "big", "small", "zero", "silent"]
        );

        let by_rel = SortSpec::new("time", DeltaKind::Relative);
        assert_eq!(
            names(&merged, &index.query(&all, Some(&by_rel))),
            ["root", "zero", "big", "small", "silent"]
        );

        let ascending = SortSpec {
            order: SortOrder::Ascending,
            ..by_rel
        };
        assert_eq!(
            names(&merged, &index.query(&all, Some(&ascending))),
            ["root", "small", "big", "zero", "silent"]
        );
    }

    #[test]
    fn ties_keep_original_order() {
        assert_eq!(compare_keys(Some(1.0), Some(1.0), SortOrder::Descending), Ordering::Equal);
        assert_eq!(compare_keys(None, Some(1.0), SortOrder::Ascending), Ordering::Greater);
        assert_eq!(compare_keys(Some(1.0), None, SortOrder::Descending), Ordering::Less);
    }
}
