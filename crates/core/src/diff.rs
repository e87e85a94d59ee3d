use std::collections::BTreeMap;

use render_profile_protocol::{Percent, Severity, SharedStr, Trend, TrendFlags};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::{AggregateResult, MergedAggregates};
use crate::config::{SeverityThresholds, ThresholdConfig};
use crate::merge::{MergedId, MergedTree};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("baseline slot {baseline} is out of range for {count} profiles")]
    BaselineOutOfRange { baseline: usize, count: usize },
    #[error("aggregates were not computed for this merged tree")]
    AggregatesMismatch,
}

/// Change of one metric's subtree sum between the baseline and a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricDelta {
    pub baseline: f64,
    /// `None` when the candidate node is present but does not report the metric.
    pub candidate: Option<f64>,
    pub absolute: Option<f64>,
    pub relative: Percent,
    pub severity: Severity,
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPresence {
    Both,
    BaselineOnly,
    CandidateOnly,
}

/// One candidate slot compared against the baseline at one merged node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotDiff {
    pub slot: usize,
    pub presence: SlotPresence,
    pub metrics: BTreeMap<SharedStr, MetricDelta>,
    /// Metrics the candidate reports that the baseline does not.
    pub added: Vec<SharedStr>,
    pub severity: Severity,
    pub trends: TrendFlags,
}

/// Diff of one merged node across all candidate slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    /// Indexed by slot. `None` for the baseline slot and for candidates where
    /// the node is absent on both sides.
    pub slots: Vec<Option<SlotDiff>>,
    pub severity: Severity,
    pub trends: TrendFlags,
    /// Highest severity anywhere in the subtree, this node included.
    pub subtree_severity: Severity,
    pub subtree_trends: TrendFlags,
}

impl DiffResult {
    pub fn slot(&self, slot: usize) -> Option<&SlotDiff> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn metric(&self, slot: usize, metric: &str) -> Option<&MetricDelta> {
        self.slot(slot)?.metrics.get(metric)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedDiff {
    baseline: usize,
    results: Vec<DiffResult>,
}

impl MergedDiff {
    pub fn baseline(&self) -> usize {
        self.baseline
    }

    pub fn get(&self, id: MergedId) -> &DiffResult {
        &self.results[id.index()]
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Relative change from `baseline` to `candidate`, in percent.
pub fn relative_delta(baseline: f64, candidate: f64) -> Percent {
    if baseline == 0.0 && candidate == 0.0 {
        Percent::Defined(0.0)
    } else {
        Percent::of(candidate - baseline, baseline)
    }
}

/// Map a delta onto a severity band.
pub fn classify(absolute: f64, relative: Percent, thresholds: &SeverityThresholds) -> Severity {
    let Some(relative) = relative.value() else {
        return Severity::New;
    };
    let relative = relative.abs();
    if absolute.abs() < thresholds.min_absolute() || relative < thresholds.minor() {
        Severity::Negligible
    } else if relative < thresholds.significant() {
        Severity::Minor
    } else if relative <= thresholds.major() {
        Severity::Significant
    } else {
        Severity::Major
    }
}

fn trend_of(absolute: f64, severity: Severity, thresholds: &SeverityThresholds) -> Option<Trend> {
    if severity < Severity::Minor || severity == Severity::Removed || absolute == 0.0 {
        return None;
    }
    let grew = absolute > 0.0;
    if grew == thresholds.higher_is_better() {
        Some(Trend::Improvement)
    } else {
        Some(Trend::Regression)
    }
}

/// Compare every candidate slot of `merged` against `baseline`.
pub fn diff(
    merged: &MergedTree,
    aggregates: &MergedAggregates,
    baseline: usize,
    thresholds: &ThresholdConfig,
) -> Result<MergedDiff, DiffError> {
    if baseline >= merged.slot_count() {
        return Err(DiffError::BaselineOutOfRange {
            baseline,
            count: merged.slot_count(),
        });
    }
    if !aggregates.matches(merged) {
        return Err(DiffError::AggregatesMismatch);
    }

    let mut results: Vec<DiffResult> = merged
        .ids()
        .map(|id| {
            let node = merged.node(id);
            let base = aggregates.result(merged, id, baseline);
            let slots: Vec<Option<SlotDiff>> = (0..merged.slot_count())
                .map(|slot| {
                    if slot == baseline {
                        return None;
                    }
                    let candidate = aggregates.result(merged, id, slot);
                    match (base, candidate) {
                        (Some(b), Some(c)) => Some(compare(slot, b, c, thresholds)),
                        (Some(b), None) => Some(removed(slot, b)),
                        (None, Some(c)) => Some(appeared(slot, c)),
                        (None, None) => None,
                    }
                })
                .collect();

            let present: Vec<&SlotDiff> = slots
                .iter()
                .flatten()
                .filter(|s| s.presence != SlotPresence::BaselineOnly)
                .collect();
            let severity = if !node.is_present(baseline) {
                Severity::New
            } else if present.is_empty() && merged.slot_count() > 1 {
                Severity::Removed
            } else {
                present
                    .iter()
                    .map(|s| s.severity)
                    .max()
                    .unwrap_or_default()
            };
            let trends = present
                .iter()
                .fold(TrendFlags::default(), |acc, s| acc.union(s.trends));

            DiffResult {
                slots,
                severity,
                trends,
                subtree_severity: severity,
                subtree_trends: trends,
            }
        })
        .collect();

    // Reverse pre-order visits children before their parent.
    for id in merged.ids().rev() {
        let (severity, trends) = merged.node(id).children().iter().fold(
            (results[id.index()].severity, results[id.index()].trends),
            |(severity, trends), child| {
                let child = &results[child.index()];
                (
                    severity.max(child.subtree_severity),
                    trends.union(child.subtree_trends),
                )
            },
        );
        results[id.index()].subtree_severity = severity;
        results[id.index()].subtree_trends = trends;
    }

    log::debug!(
        "diffed {} merged nodes against slot {baseline}, root subtree severity {}",
        results.len(),
        results.first().map(|r| r.subtree_severity).unwrap_or_default()
    );
    Ok(MergedDiff { baseline, results })
}

fn compare(
    slot: usize,
    base: &AggregateResult,
    candidate: &AggregateResult,
    thresholds: &ThresholdConfig,
) -> SlotDiff {
    let mut metrics = BTreeMap::new();
    let mut trends = TrendFlags::default();
    let mut severity = Severity::Negligible;

    for (name, stats) in &base.metrics {
        let delta = match candidate.sum(name) {
            Some(value) => {
                let bands = thresholds.for_metric(name);
                let absolute = value - stats.sum;
                let relative = relative_delta(stats.sum, value);
                let metric_severity = classify(absolute, relative, bands);
                MetricDelta {
                    baseline: stats.sum,
                    candidate: Some(value),
                    absolute: Some(absolute),
                    relative,
                    severity: metric_severity,
                    trend: trend_of(absolute, metric_severity, bands),
                }
            }
            None => MetricDelta {
                baseline: stats.sum,
                candidate: None,
                absolute: None,
                relative: Percent::Undefined,
                severity: Severity::Removed,
                trend: None,
            },
        };
        severity = severity.max(delta.severity);
        if let Some(trend) = delta.trend {
            trends = trends.with(trend);
        }
        metrics.insert(name.clone(), delta);
    }

    let added = candidate
        .metrics
        .keys()
        .filter(|name| !base.metrics.contains_key(*name))
        .cloned()
        .collect();

    SlotDiff {
        slot,
        presence: SlotPresence::Both,
        metrics,
        added,
        severity,
        trends,
    }
}

fn removed(slot: usize, base: &AggregateResult) -> SlotDiff {
    let metrics = base
        .metrics
        .iter()
        .map(|(name, stats)| {
            let delta = MetricDelta {
                baseline: stats.sum,
                candidate: None,
                absolute: None,
                relative: Percent::Undefined,
                severity: Severity::Removed,
                trend: None,
            };
            (name.clone(), delta)
        })
        .collect();
    SlotDiff {
        slot,
        presence: SlotPresence::BaselineOnly,
        metrics,
        added: Vec::new(),
        severity: Severity::Removed,
        trends: TrendFlags::default(),
    }
}

fn appeared(slot: usize, candidate: &AggregateResult) -> SlotDiff {
    SlotDiff {
        slot,
        presence: SlotPresence::CandidateOnly,
        metrics: BTreeMap::new(),
        added: candidate.metrics.keys().cloned().collect(),
        severity: Severity::New,
        trends: TrendFlags::default(),
    }
}
