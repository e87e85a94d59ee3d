use std::collections::{BTreeMap, HashMap, HashSet};

use render_profile_protocol::{ProfileMeta, RawProfile, RawRecord, RecordTable, SharedStr};
use serde_json::Value;
use thiserror::Error;

use super::{NodeId, NodeKey, ProfileNode, ProfileTree, Reported, TreeWarning};
use crate::config::{EngineConfig, Reconcile, ValueKind};

#[derive(Debug, Error, PartialEq)]
pub enum MalformedProfile {
    #[error("{path}: metrics must be a mapping, found {found}")]
    NonMappingMetrics { path: String, found: &'static str },
    #[error("{path}: metric `{metric}` is not a number or a {{self, total}} mapping")]
    NonNumericMetric { path: String, metric: String },
    #[error("{path}: metric `{metric}` is negative ({value})")]
    NegativeMetric {
        path: String,
        metric: String,
        value: f64,
    },
    #[error("{path}: cycle detected while walking children")]
    Cycle { path: String },
    #[error("{path}: record is referenced by more than one parent")]
    SharedRecord { path: String },
    #[error("{path}: subtree sum of `{metric}` overflows")]
    SumOverflow { path: String, metric: String },
    #[error("{path}: nesting deeper than the limit of {limit}")]
    DepthExceeded { path: String, limit: usize },
    #[error("record {parent} references unknown child {child}")]
    UnknownChild { parent: u64, child: u64 },
    #[error("root record {0} not found")]
    UnknownRoot(u64),
    #[error("record id {0} appears more than once")]
    DuplicateRecordId(u64),
}

/// Build a tree from a nested profile.
pub fn build_tree(raw: &RawProfile, config: &EngineConfig) -> Result<ProfileTree, MalformedProfile> {
    Builder::new(Nested, config).build(&raw.root, raw.meta.clone())
}

/// Build a tree from an id-linked record table.
pub fn build_tree_from_table(
    table: &RecordTable,
    config: &EngineConfig,
) -> Result<ProfileTree, MalformedProfile> {
    let source = Table::index(table)?;
    let root = *source
        .by_id
        .get(&table.root)
        .ok_or(MalformedProfile::UnknownRoot(table.root))?;
    Builder::new(source, config).build(root, table.meta.clone())
}

/// Read access to an external record hierarchy.
///
/// `Handle` is whatever cheaply names one record; `identity` must be unique
/// per record so cycles and shared records can be detected.
trait RecordSource<'a> {
    type Handle: Copy;

    fn name(&self, handle: Self::Handle) -> &'a str;
    fn metrics(&self, handle: Self::Handle) -> &'a Value;
    fn explicit_index(&self, handle: Self::Handle) -> Option<u32>;
    fn children(&self, handle: Self::Handle) -> Result<Vec<Self::Handle>, MalformedProfile>;
    fn identity(&self, handle: Self::Handle) -> usize;
}

struct Nested;

impl<'a> RecordSource<'a> for Nested {
    type Handle = &'a RawRecord;

    fn name(&self, handle: Self::Handle) -> &'a str {
        &handle.name
    }

    fn metrics(&self, handle: Self::Handle) -> &'a Value {
        &handle.metrics
    }

    fn explicit_index(&self, handle: Self::Handle) -> Option<u32> {
        handle.index
    }

    fn children(&self, handle: Self::Handle) -> Result<Vec<Self::Handle>, MalformedProfile> {
        Ok(handle.children.iter().collect())
    }

    fn identity(&self, handle: Self::Handle) -> usize {
        std::ptr::from_ref(handle) as usize
    }
}

struct Table<'a> {
    table: &'a RecordTable,
    by_id: HashMap<u64, usize>,
}

impl<'a> Table<'a> {
    fn index(table: &'a RecordTable) -> Result<Self, MalformedProfile> {
        let mut by_id = HashMap::with_capacity(table.records.len());
        for (i, record) in table.records.iter().enumerate() {
            if by_id.insert(record.id, i).is_some() {
                return Err(MalformedProfile::DuplicateRecordId(record.id));
            }
        }
        Ok(Self { table, by_id })
    }
}

impl<'a> RecordSource<'a> for Table<'a> {
    type Handle = usize;

    fn name(&self, handle: usize) -> &'a str {
        &self.table.records[handle].name
    }

    fn metrics(&self, handle: usize) -> &'a Value {
        &self.table.records[handle].metrics
    }

    fn explicit_index(&self, handle: usize) -> Option<u32> {
        self.table.records[handle].index
    }

    fn children(&self, handle: usize) -> Result<Vec<usize>, MalformedProfile> {
        let record = &self.table.records[handle];
        record
            .children
            .iter()
            .map(|child| {
                self.by_id
                    .get(child)
                    .copied()
                    .ok_or(MalformedProfile::UnknownChild {
                        parent: record.id,
                        child: *child,
                    })
            })
            .collect()
    }

    fn identity(&self, handle: usize) -> usize {
        handle
    }
}

type Sums = BTreeMap<SharedStr, f64>;

struct Builder<'a, 'c, S: RecordSource<'a>> {
    source: S,
    config: &'c EngineConfig,
    nodes: Vec<ProfileNode>,
    warnings: Vec<TreeWarning>,
    /// Identities of the records on the current root-to-node path.
    on_path: HashSet<usize>,
    /// Identities of every record walked so far.
    visited: HashSet<usize>,
    path: Vec<String>,
    _records: std::marker::PhantomData<&'a ()>,
}

impl<'a, 'c, S: RecordSource<'a>> Builder<'a, 'c, S> {
    fn new(source: S, config: &'c EngineConfig) -> Self {
        Self {
            source,
            config,
            nodes: Vec::new(),
            warnings: Vec::new(),
            on_path: HashSet::new(),
            visited: HashSet::new(),
            path: Vec::new(),
            _records: std::marker::PhantomData,
        }
    }

    fn build(
        mut self,
        root: S::Handle,
        meta: ProfileMeta,
    ) -> Result<ProfileTree, MalformedProfile> {
        let ordinal = self.source.explicit_index(root).unwrap_or(0);
        let root_key = NodeKey::new(self.source.name(root), ordinal);
        self.walk(root, root_key, None, 0)?;

        for warning in &self.warnings {
            log::warn!("{}: {warning}", meta.display_label());
        }
        log::debug!(
            "built profile `{}`: {} nodes, {} warnings",
            meta.display_label(),
            self.nodes.len(),
            self.warnings.len()
        );

        Ok(ProfileTree {
            meta,
            nodes: self.nodes,
            warnings: self.warnings,
        })
    }

    /// Add `handle` and its subtree; returns the subtree sums per metric.
    fn walk(
        &mut self,
        handle: S::Handle,
        key: NodeKey,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Result<Sums, MalformedProfile> {
        self.path.push(key.to_string());
        if depth > self.config.max_depth {
            return Err(MalformedProfile::DepthExceeded {
                path: self.path_string(),
                limit: self.config.max_depth,
            });
        }
        let identity = self.source.identity(handle);
        if !self.on_path.insert(identity) {
            return Err(MalformedProfile::Cycle {
                path: self.path_string(),
            });
        }
        if !self.visited.insert(identity) {
            return Err(MalformedProfile::SharedRecord {
                path: self.path_string(),
            });
        }

        let reported = self.parse_metrics(self.source.metrics(handle))?;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ProfileNode {
            key,
            reported,
            self_values: BTreeMap::new(),
            children: Vec::new(),
            parent,
            depth: depth as u32,
        });

        let mut children_sums = Sums::new();
        let mut child_ids = Vec::new();
        let mut seen: HashMap<&'a str, u32> = HashMap::new();
        for child in self.source.children(handle)? {
            let name = self.source.name(child);
            let position = seen.entry(name).or_insert(0);
            let ordinal = self.source.explicit_index(child).unwrap_or(*position);
            *position += 1;

            child_ids.push(NodeId(self.nodes.len() as u32));
            let sums = self.walk(child, NodeKey::new(name, ordinal), Some(id), depth + 1)?;
            for (metric, value) in sums {
                *children_sums.entry(metric).or_default() += value;
            }
        }

        let self_values = self.reconcile(id, &children_sums);
        let node = &mut self.nodes[id.index()];
        node.children = child_ids;

        let mut subtree = children_sums;
        for (metric, value) in &self_values {
            *subtree.entry(metric.clone()).or_default() += value;
        }
        node.self_values = self_values;
        if let Some((metric, _)) = subtree.iter().find(|(_, sum)| !sum.is_finite()) {
            return Err(MalformedProfile::SumOverflow {
                path: self.path_string(),
                metric: metric.to_string(),
            });
        }

        self.on_path.remove(&identity);
        self.path.pop();
        Ok(subtree)
    }

    /// Turn reported self/total pairs into the node's own contributions.
    fn reconcile(&mut self, id: NodeId, children: &Sums) -> Sums {
        let mut self_values = Sums::new();
        let reported = self.nodes[id.index()].reported.clone();
        for (metric, value) in reported {
            let below = children.get(&metric).copied().unwrap_or(0.0);
            let policy = self.config.policy(&metric);
            let used = match (policy.reconcile, value.self_value, value.total) {
                (Reconcile::TrustSelf, Some(own), total) => {
                    if let Some(total) = total
                        && !approx_eq(own + below, total)
                    {
                        self.warn_inconsistent(&metric, own, own);
                    }
                    own
                }
                (_, own, Some(total)) => {
                    let derived = total - below;
                    let used = if derived < 0.0 && !approx_eq(total, below) {
                        self.warnings.push(TreeWarning::TotalBelowChildren {
                            path: self.path_string(),
                            metric: metric.clone(),
                            total,
                            children: below,
                        });
                        0.0
                    } else {
                        derived.max(0.0)
                    };
                    if let Some(own) = own
                        && !approx_eq(own, used)
                    {
                        self.warn_inconsistent(&metric, own, used);
                    }
                    used
                }
                (_, Some(own), None) => own,
                (_, None, None) => continue,
            };
            self_values.insert(metric, used);
        }
        self_values
    }

    fn warn_inconsistent(&mut self, metric: &SharedStr, reported_self: f64, used_self: f64) {
        self.warnings.push(TreeWarning::InconsistentSelf {
            path: self.path_string(),
            metric: metric.clone(),
            reported_self,
            used_self,
        });
    }

    fn parse_metrics(&self, value: &Value) -> Result<BTreeMap<SharedStr, Reported>, MalformedProfile> {
        let map = match value {
            Value::Null => return Ok(BTreeMap::new()),
            Value::Object(map) => map,
            other => {
                return Err(MalformedProfile::NonMappingMetrics {
                    path: self.path_string(),
                    found: json_kind(other),
                });
            }
        };

        let mut reported = BTreeMap::new();
        for (metric, value) in map {
            let entry = match value {
                Value::Number(_) => {
                    let number = self.number(metric, value)?;
                    match self.config.policy(metric).value_kind {
                        ValueKind::Total => Reported {
                            self_value: None,
                            total: Some(number),
                        },
                        ValueKind::SelfValue => Reported {
                            self_value: Some(number),
                            total: None,
                        },
                    }
                }
                Value::Object(pair) => {
                    let mut entry = Reported::default();
                    for (field, value) in pair {
                        let number = Some(self.number(metric, value)?);
                        match field.as_str() {
                            "self" => entry.self_value = number,
                            "total" => entry.total = number,
                            _ => return Err(self.non_numeric(metric)),
                        }
                    }
                    entry
                }
                _ => return Err(self.non_numeric(metric)),
            };
            if entry.self_value.is_some() || entry.total.is_some() {
                reported.insert(SharedStr::from(metric.as_str()), entry);
            }
        }
        Ok(reported)
    }

    fn number(&self, metric: &str, value: &Value) -> Result<f64, MalformedProfile> {
        let number = value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.non_numeric(metric))?;
        if number < 0.0 {
            return Err(MalformedProfile::NegativeMetric {
                path: self.path_string(),
                metric: metric.to_string(),
                value: number,
            });
        }
        Ok(number)
    }

    fn non_numeric(&self, metric: &str) -> MalformedProfile {
        MalformedProfile::NonNumericMetric {
            path: self.path_string(),
            metric: metric.to_string(),
        }
    }

    fn path_string(&self) -> String {
        self.path.join("/")
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use render_profile_protocol::TableRecord;
    use serde_json::json;

    use super::*;
    use crate::config::MetricPolicy;

    fn profile(root: RawRecord) -> RawProfile {
        RawProfile {
            meta: ProfileMeta::default(),
            root,
        }
    }

    fn table(root: u64, records: Vec<TableRecord>) -> RecordTable {
        RecordTable {
            meta: ProfileMeta::default(),
            root,
            records,
        }
    }

    fn record(id: u64, name: &str, children: Vec<u64>) -> TableRecord {
        TableRecord {
            id,
            name: name.into(),
            metrics: json!({"time": 1.0}),
            index: None,
            children,
        }
    }

    #[test]
    fn totals_become_self_contributions() {
        let raw = profile(
            RawRecord::new("root")
                .with_metric("time", 100.0)
                .with_child(RawRecord::new("A").with_metric("time", 60.0))
                .with_child(RawRecord::new("B").with_metric("time", 30.0)),
        );
        let tree = build_tree(&raw, &EngineConfig::default());
        let tree = tree.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), Some(10.0));
        assert_eq!(tree.node(NodeId(1)).self_value("time"), Some(60.0));
        assert!(tree.warnings().is_empty());
    }

    #[test]
    fn nodes_without_metrics_have_no_self_value() {
        let raw = profile(
            RawRecord::new("root").with_child(RawRecord::new("leaf").with_metric("time", 5.0)),
        );
        let tree = build_tree(&raw, &EngineConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), None);
        assert_eq!(tree.node(NodeId(1)).self_value("time"), Some(5.0));
    }

    #[test]
    fn total_below_children_is_clamped_with_warning() {
        let raw = profile(
            RawRecord::new("root")
                .with_metric("time", 10.0)
                .with_child(RawRecord::new("A").with_metric("time", 25.0)),
        );
        let tree = build_tree(&raw, &EngineConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), Some(0.0));
        assert!(matches!(
            tree.warnings(),
            [TreeWarning::TotalBelowChildren { total, children, .. }] if *total == 10.0 && *children == 25.0
        ));
    }

    #[test]
    fn self_and_total_mapping() {
        let mut root = RawRecord::new("root");
        root.metrics = json!({"time": {"self": 4.0, "total": 10.0}});
        let raw = profile(root.with_child(RawRecord::new("A").with_metric("time", 6.0)));

        let tree = build_tree(&raw, &EngineConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), Some(4.0));
        assert!(tree.warnings().is_empty());
        let reported = tree.root_node().reported().get("time").copied();
        assert_eq!(
            reported,
            Some(Reported {
                self_value: Some(4.0),
                total: Some(10.0)
            })
        );
    }

    #[test]
    fn trust_self_keeps_reported_self() {
        let mut root = RawRecord::new("root");
        root.metrics = json!({"time": {"self": 7.0, "total": 10.0}});
        let raw = profile(root.with_child(RawRecord::new("A").with_metric("time", 6.0)));

        let mut config = EngineConfig::default();
        config.metrics.insert(
            "time".into(),
            MetricPolicy {
                value_kind: ValueKind::Total,
                reconcile: Reconcile::TrustSelf,
            },
        );
        let tree = build_tree(&raw, &config).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), Some(7.0));
        assert_eq!(tree.warnings().len(), 1);

        let tree = build_tree(&raw, &EngineConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), Some(4.0));
        assert!(matches!(
            tree.warnings(),
            [TreeWarning::InconsistentSelf { reported_self, used_self, .. }] if *reported_self == 7.0 && *used_self == 4.0
        ));
    }

    #[test]
    fn bare_values_can_be_read_as_self() {
        let mut config = EngineConfig::default();
        config.default_policy.value_kind = ValueKind::SelfValue;
        let raw = profile(
            RawRecord::new("root")
                .with_metric("time", 3.0)
                .with_child(RawRecord::new("A").with_metric("time", 6.0)),
        );
        let tree = build_tree(&raw, &config).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(tree.root_node().self_value("time"), Some(3.0));
    }

    #[test]
    fn positional_ordinals_for_repeated_names() {
        let raw = profile(
            RawRecord::new("root")
                .with_child(RawRecord::new("shade"))
                .with_child(RawRecord::new("trace"))
                .with_child(RawRecord::new("shade")),
        );
        let tree = build_tree(&raw, &EngineConfig::default()).unwrap_or_else(|e| panic!("{e}"));
        let keys: Vec<_> = tree
            .root_node()
            .children()
            .iter()
            .map(|&c| tree.node(c).key().clone())
            .collect();
        assert_eq!(
            keys,
            [
                NodeKey::new("shade", 0),
                NodeKey::new("trace", 0),
                NodeKey::new("shade", 1)
            ]
        );
    }

    #[test]
    fn rejects_non_mapping_metrics() {
        let mut root = RawRecord::new("root");
        root.metrics = json!([1, 2]);
        let err = build_tree(&profile(root), &EngineConfig::default()).err();
        assert_eq!(
            err,
            Some(MalformedProfile::NonMappingMetrics {
                path: "root".into(),
                found: "an array"
            })
        );
    }

    #[test]
    fn rejects_non_numeric_and_negative_values() {
        let mut child = RawRecord::new("A");
        child.metrics = json!({"time": "12s"});
        let err = build_tree(
            &profile(RawRecord::new("root").with_child(child)),
            &EngineConfig::default(),
        )
        .err();
        assert_eq!(
            err,
            Some(MalformedProfile::NonNumericMetric {
                path: "root/A".into(),
                metric: "time".into()
            })
        );

        let mut child = RawRecord::new("A");
        child.metrics = json!({"time": {"self": 1.0, "avg": 2.0}});
        let err = build_tree(
            &profile(RawRecord::new("root").with_child(child)),
            &EngineConfig::default(),
        );
        assert!(matches!(err, Err(MalformedProfile::NonNumericMetric { .. })));

        let mut child = RawRecord::new("A");
        child.metrics = json!({"time": -1.0});
        let err = build_tree(
            &profile(RawRecord::new("root").with_child(child)),
            &EngineConfig::default(),
        );
        assert!(matches!(err, Err(MalformedProfile::NegativeMetric { .. })));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut config = EngineConfig::default();
        config.max_depth = 3;

        let mut chain = RawRecord::new("n3");
        for name in ["n2", "n1", "n0"] {
            chain = RawRecord::new(name).with_child(chain);
        }
        assert!(build_tree(&profile(chain.clone()), &config).is_ok());

        let too_deep = RawRecord::new("top").with_child(chain);
        let err = build_tree(&profile(too_deep), &config).err();
        assert_eq!(
            err,
            Some(MalformedProfile::DepthExceeded {
                path: "top/n0/n1/n2/n3".into(),
                limit: 3
            })
        );
    }

    #[test]
    fn table_cycle_is_detected() {
        let t = table(
            1,
            vec![
                record(1, "frame", vec![2]),
                record(2, "MCRT", vec![3]),
                record(3, "Integration", vec![2]),
            ],
        );
        let err = build_tree_from_table(&t, &EngineConfig::default()).err();
        assert_eq!(
            err,
            Some(MalformedProfile::Cycle {
                path: "frame/MCRT/Integration/MCRT".into()
            })
        );
    }

    #[test]
    fn table_shared_child_is_rejected() {
        let t = table(
            1,
            vec![
                record(1, "frame", vec![2, 3]),
                record(2, "A", vec![4]),
                record(3, "B", vec![4]),
                record(4, "shared", vec![]),
            ],
        );
        assert_eq!(
            build_tree_from_table(&t, &EngineConfig::default()).err(),
            Some(MalformedProfile::SharedRecord {
                path: "frame/B/shared".into()
            })
        );
    }

    #[test]
    fn table_fan_in_chain_fails_fast() {
        // Each record lists its successor twice; expanding it would double
        // the node count per level.
        let records = (1..=40)
            .map(|id| {
                let children = if id < 40 { vec![id + 1, id + 1] } else { vec![] };
                record(id, "stage", children)
            })
            .collect();
        let err = build_tree_from_table(&table(1, records), &EngineConfig::default());
        assert!(matches!(err, Err(MalformedProfile::SharedRecord { .. })));
    }

    #[test]
    fn overflowing_subtree_sum_is_rejected() {
        let raw = profile(
            RawRecord::new("root")
                .with_child(RawRecord::new("A").with_metric("time", 1.5e308))
                .with_child(RawRecord::new("B").with_metric("time", 1.5e308)),
        );
        assert_eq!(
            build_tree(&raw, &EngineConfig::default()).err(),
            Some(MalformedProfile::SumOverflow {
                path: "root".into(),
                metric: "time".into()
            })
        );
    }

    #[test]
    fn table_reference_errors() {
        let t = table(9, vec![record(1, "frame", vec![])]);
        assert_eq!(
            build_tree_from_table(&t, &EngineConfig::default()).err(),
            Some(MalformedProfile::UnknownRoot(9))
        );

        let t = table(1, vec![record(1, "frame", vec![5])]);
        assert_eq!(
            build_tree_from_table(&t, &EngineConfig::default()).err(),
            Some(MalformedProfile::UnknownChild { parent: 1, child: 5 })
        );

        let t = table(1, vec![record(1, "frame", vec![]), record(1, "again", vec![])]);
        assert_eq!(
            build_tree_from_table(&t, &EngineConfig::default()).err(),
            Some(MalformedProfile::DuplicateRecordId(1))
        );
    }
}
