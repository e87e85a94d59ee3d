use std::collections::BTreeMap;

use render_profile_protocol::SharedStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_DEPTH: usize = 256;
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "{scope}: severity breakpoints must increase strictly (minor {minor} < significant {significant} < major {major})"
    )]
    NonMonotonic {
        scope: String,
        minor: f64,
        significant: f64,
        major: f64,
    },
    #[error("{scope}: `{field}` must be a finite, non-negative number (got {value})")]
    InvalidValue {
        scope: String,
        field: &'static str,
        value: f64,
    },
}

/// How a bare number in a record's metrics mapping is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// The value covers the node and all of its descendants.
    #[default]
    Total,
    /// The value covers the node alone.
    #[serde(rename = "self")]
    SelfValue,
}

/// Which reported value wins when a node reports both self and total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconcile {
    /// Derive self from the total minus the children's subtree sums.
    #[default]
    TrustTotal,
    /// Keep the reported self value; totals only fill in missing selfs.
    TrustSelf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPolicy {
    #[serde(default)]
    pub value_kind: ValueKind,
    #[serde(default)]
    pub reconcile: Reconcile,
}

/// Engine-wide settings for tree construction and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deepest allowed node (the root is depth 0).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Trees with more nodes than this are aggregated on the rayon pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default)]
    pub default_policy: MetricPolicy,
    /// Per-metric overrides of `default_policy`.
    #[serde(default)]
    pub metrics: BTreeMap<SharedStr, MetricPolicy>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_parallel_threshold() -> usize {
    DEFAULT_PARALLEL_THRESHOLD
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            default_policy: MetricPolicy::default(),
            metrics: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn policy(&self, metric: &str) -> MetricPolicy {
        self.metrics
            .get(metric)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

/// Breakpoints (in percent of the baseline) that map a delta to a severity.
///
/// Only constructible through validation, so a classification never runs with
/// overlapping bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdsDef")]
pub struct SeverityThresholds {
    minor: f64,
    significant: f64,
    major: f64,
    min_absolute: f64,
    higher_is_better: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThresholdsDef {
    #[serde(default = "default_minor")]
    minor: f64,
    #[serde(default = "default_significant")]
    significant: f64,
    #[serde(default = "default_major")]
    major: f64,
    #[serde(default)]
    min_absolute: f64,
    #[serde(default)]
    higher_is_better: bool,
}

fn default_minor() -> f64 {
    2.0
}

fn default_significant() -> f64 {
    10.0
}

fn default_major() -> f64 {
    50.0
}

impl SeverityThresholds {
    pub fn new(minor: f64, significant: f64, major: f64) -> Result<Self, ConfigError> {
        Self::validated(
            "thresholds",
            ThresholdsDef {
                minor,
                significant,
                major,
                min_absolute: 0.0,
                higher_is_better: false,
            },
        )
    }

    /// Deltas smaller than this in absolute units are always negligible.
    pub fn with_min_absolute(self, min_absolute: f64) -> Result<Self, ConfigError> {
        Self::validated(
            "thresholds",
            ThresholdsDef {
                min_absolute,
                ..self.def()
            },
        )
    }

    /// Mark the metric as a throughput-like value where increases are good.
    pub fn with_higher_is_better(mut self, higher_is_better: bool) -> Self {
        self.higher_is_better = higher_is_better;
        self
    }

    pub fn minor(&self) -> f64 {
        self.minor
    }

    pub fn significant(&self) -> f64 {
        self.significant
    }

    pub fn major(&self) -> f64 {
        self.major
    }

    pub fn min_absolute(&self) -> f64 {
        self.min_absolute
    }

    pub fn higher_is_better(&self) -> bool {
        self.higher_is_better
    }

    fn def(self) -> ThresholdsDef {
        ThresholdsDef {
            minor: self.minor,
            significant: self.significant,
            major: self.major,
            min_absolute: self.min_absolute,
            higher_is_better: self.higher_is_better,
        }
    }

    fn validated(scope: &str, def: ThresholdsDef) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("minor", def.minor),
            ("significant", def.significant),
            ("major", def.major),
            ("min_absolute", def.min_absolute),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    scope: scope.to_string(),
                    field,
                    value,
                });
            }
        }
        if !(def.minor < def.significant && def.significant < def.major) {
            return Err(ConfigError::NonMonotonic {
                scope: scope.to_string(),
                minor: def.minor,
                significant: def.significant,
                major: def.major,
            });
        }
        Ok(Self {
            minor: def.minor,
            significant: def.significant,
            major: def.major,
            min_absolute: def.min_absolute,
            higher_is_better: def.higher_is_better,
        })
    }
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            minor: default_minor(),
            significant: default_significant(),
            major: default_major(),
            min_absolute: 0.0,
            higher_is_better: false,
        }
    }
}

impl TryFrom<ThresholdsDef> for SeverityThresholds {
    type Error = ConfigError;

    fn try_from(def: ThresholdsDef) -> Result<Self, Self::Error> {
        Self::validated("thresholds", def)
    }
}

/// Severity thresholds with per-metric overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdConfigDef")]
pub struct ThresholdConfig {
    default: SeverityThresholds,
    metrics: BTreeMap<SharedStr, SeverityThresholds>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThresholdConfigDef {
    #[serde(default)]
    default: Option<ThresholdsDef>,
    #[serde(default)]
    metrics: BTreeMap<SharedStr, ThresholdsDef>,
}

impl TryFrom<ThresholdConfigDef> for ThresholdConfig {
    type Error = ConfigError;

    fn try_from(def: ThresholdConfigDef) -> Result<Self, Self::Error> {
        let default = match def.default {
            Some(d) => SeverityThresholds::validated("thresholds.default", d)?,
            None => SeverityThresholds::default(),
        };
        let mut metrics = BTreeMap::new();
        for (name, d) in def.metrics {
            let scope = format!("thresholds.metrics.{name}");
            metrics.insert(name, SeverityThresholds::validated(&scope, d)?);
        }
        Ok(Self { default, metrics })
    }
}

impl ThresholdConfig {
    pub fn new(default: SeverityThresholds) -> Self {
        Self {
            default,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, metric: impl Into<SharedStr>, thresholds: SeverityThresholds) -> Self {
        self.metrics.insert(metric.into(), thresholds);
        self
    }

    pub fn for_metric(&self, metric: &str) -> &SeverityThresholds {
        self.metrics.get(metric).unwrap_or(&self.default)
    }

    pub fn default_thresholds(&self) -> &SeverityThresholds {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_bands() {
        let t = SeverityThresholds::default();
        assert_eq!((t.minor(), t.significant(), t.major()), (2.0, 10.0, 50.0));
        assert_eq!(t.min_absolute(), 0.0);
        assert!(!t.higher_is_better());
    }

    #[test]
    fn rejects_non_monotonic_breakpoints() {
        let err = SeverityThresholds::new(10.0, 5.0, 50.0);
        assert!(matches!(err, Err(ConfigError::NonMonotonic { .. })));
        assert!(SeverityThresholds::new(2.0, 2.0, 50.0).is_err());
        assert!(SeverityThresholds::new(-1.0, 2.0, 50.0).is_err());
        assert!(SeverityThresholds::new(1.0, 2.0, f64::INFINITY).is_err());
    }

    #[test]
    fn deserialization_validates_per_metric() {
        let json = r#"{"metrics": {"memory": {"minor": 20.0, "significant": 5.0}}}"#;
        let err = serde_json::from_str::<ThresholdConfig>(json)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("thresholds.metrics.memory"), "{err}");
    }

    #[test]
    fn per_metric_overrides_fall_back_to_default() {
        let json = r#"{
            "default": {"minor": 1.0, "significant": 5.0, "major": 25.0},
            "metrics": {"pixel_samples": {"higher_is_better": true}}
        }"#;
        let config: ThresholdConfig = serde_json::from_str(json).unwrap_or_default();
        assert_eq!(config.for_metric("time").major(), 25.0);
        let samples = config.for_metric("pixel_samples");
        assert!(samples.higher_is_better());
        assert_eq!(samples.major(), 50.0);
    }

    #[test]
    fn policy_lookup_uses_override() {
        let mut config = EngineConfig::default();
        config.metrics.insert(
            "time".into(),
            MetricPolicy {
                value_kind: ValueKind::SelfValue,
                reconcile: Reconcile::TrustSelf,
            },
        );
        assert_eq!(config.policy("time").value_kind, ValueKind::SelfValue);
        assert_eq!(config.policy("memory"), MetricPolicy::default());
    }
}
