use std::collections::BTreeSet;
use std::sync::Arc;

use render_profile_protocol::SharedStr;
use thiserror::Error;

use crate::aggregate::{MergedAggregates, aggregate_merged};
use crate::config::{EngineConfig, ThresholdConfig};
use crate::diff::{DiffError, MergedDiff, diff};
use crate::merge::{DuplicateIdentity, MergeError, MergedTree, merge};
use crate::model::{MalformedProfile, ProfileTree};
use crate::parsers::{ParseError, RawInput, parse_auto};
use crate::query::{QueryFilter, QueryIndex, QueryView, SortSpec};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{label}: {source}")]
    Parse {
        label: String,
        #[source]
        source: ParseError,
    },
    #[error("{label}: malformed profile: {source}")]
    Malformed {
        label: String,
        #[source]
        source: MalformedProfile,
    },
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error("baseline slot {baseline} is out of range for {count} profiles")]
    BaselineOutOfRange { baseline: usize, count: usize },
}

/// One loaded profile within a session.
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub tree: Arc<ProfileTree>,
    /// Human-readable label for this profile source.
    pub label: String,
}

/// Owns the loaded profiles and runs comparisons over them.
///
/// Trees are shared by `Arc`, so a finished `Comparison` stays valid after the
/// session changes, and independent sessions can run on separate threads.
#[derive(Debug, Clone, Default)]
pub struct ComparisonSession {
    config: EngineConfig,
    thresholds: ThresholdConfig,
    profiles: Vec<ProfileEntry>,
    baseline: usize,
}

impl ComparisonSession {
    pub fn new(config: EngineConfig, thresholds: ThresholdConfig) -> Self {
        Self {
            config,
            thresholds,
            profiles: Vec::new(),
            baseline: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Parse `data` in any supported format and load it.
    pub fn load_bytes(&mut self, data: &[u8], label: impl Into<String>) -> Result<usize, SessionError> {
        let label = label.into();
        let input = match parse_auto(data, &self.config) {
            Ok(input) => input,
            Err(source) => return Err(SessionError::Parse { label, source }),
        };
        self.load(&input, label)
    }

    /// Build a tree from a parsed input and add it. Returns its slot.
    ///
    /// A malformed input is rejected on its own; previously loaded profiles
    /// are unaffected.
    pub fn load(&mut self, input: &RawInput, label: impl Into<String>) -> Result<usize, SessionError> {
        let label = label.into();
        match input.build(&self.config) {
            Ok(tree) => Ok(self.add_tree(Arc::new(tree), label)),
            Err(source) => Err(SessionError::Malformed { label, source }),
        }
    }

    /// Add an already built tree. Returns its slot.
    pub fn add_tree(&mut self, tree: Arc<ProfileTree>, label: impl Into<String>) -> usize {
        let label = label.into();
        log::debug!("loaded {label}: {} nodes, {} warnings", tree.len(), tree.warnings().len());
        self.profiles.push(ProfileEntry { tree, label });
        self.profiles.len() - 1
    }

    pub fn set_baseline(&mut self, baseline: usize) -> Result<(), SessionError> {
        if baseline >= self.profiles.len() {
            return Err(SessionError::BaselineOutOfRange {
                baseline,
                count: self.profiles.len(),
            });
        }
        self.baseline = baseline;
        Ok(())
    }

    pub fn baseline(&self) -> usize {
        self.baseline
    }

    pub fn profiles(&self) -> &[ProfileEntry] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Run merge, aggregation and diff over every loaded profile.
    ///
    /// `metrics` limits the comparison; by default every metric any profile
    /// reports is compared.
    pub fn compare(&self, metrics: Option<&BTreeSet<SharedStr>>) -> Result<Comparison, SessionError> {
        let trees: Vec<Arc<ProfileTree>> = self.profiles.iter().map(|p| Arc::clone(&p.tree)).collect();
        let output = merge(&trees, self.baseline)?;
        let metrics = match metrics {
            Some(metrics) => metrics.clone(),
            None => trees.iter().flat_map(|t| t.metric_names()).collect(),
        };
        let aggregates = aggregate_merged(&output.tree, &metrics, &self.config);
        let diff = diff(&output.tree, &aggregates, self.baseline, &self.thresholds)?;
        Ok(Comparison {
            labels: self.profiles.iter().map(|p| p.label.clone()).collect(),
            merged: output.tree,
            warnings: output.warnings,
            aggregates,
            diff,
            metrics,
        })
    }
}

/// Everything derived from one comparison run.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Slot labels, in slot order.
    pub labels: Vec<String>,
    pub merged: MergedTree,
    pub warnings: Vec<DuplicateIdentity>,
    pub aggregates: MergedAggregates,
    pub diff: MergedDiff,
    pub metrics: BTreeSet<SharedStr>,
}

impl Comparison {
    pub fn index(&self) -> QueryIndex<'_> {
        QueryIndex::new(&self.merged, &self.diff)
    }

    pub fn query(&self, filter: &QueryFilter, sort: Option<&SortSpec>) -> QueryView {
        self.index().query(filter, sort)
    }
}
