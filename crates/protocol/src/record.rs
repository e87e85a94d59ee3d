use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::ProfileMeta;

/// One entry of a parsed render profile, as handed over by a format reader.
///
/// The shape is deliberately loose: `metrics` is kept as an untyped JSON value
/// so that the engine, not the reader, decides what counts as malformed. Each
/// entry of the mapping is either a bare number or `{ "self": n, "total": n }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: String,
    #[serde(default)]
    pub metrics: Value,
    /// Explicit ordinal among same-named siblings (e.g. a shader invocation
    /// number). Derived from position when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub children: Vec<RawRecord>,
}

impl RawRecord {
    /// A record with no metrics and no children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: Value::Null,
            index: None,
            children: Vec::new(),
        }
    }

    /// Builder helper: set a bare numeric metric.
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        if !self.metrics.is_object() {
            self.metrics = Value::Object(serde_json::Map::new());
        }
        if let (Value::Object(map), Some(number)) =
            (&mut self.metrics, serde_json::Number::from_f64(value))
        {
            map.insert(name.to_string(), Value::Number(number));
        }
        self
    }

    /// Builder helper: append a child record.
    pub fn with_child(mut self, child: RawRecord) -> Self {
        self.children.push(child);
        self
    }
}

/// A complete nested profile: metadata plus the root record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProfile {
    #[serde(default)]
    pub meta: ProfileMeta,
    pub root: RawRecord,
}

/// A record in the flat, id-linked form some readers produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Ids of child records, in display order.
    #[serde(default)]
    pub children: Vec<u64>,
}

/// Flat profile form. Children are referenced by id, so a buggy reader can
/// produce cycles or dangling references; tree construction rejects both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTable {
    #[serde(default)]
    pub meta: ProfileMeta,
    pub root: u64,
    pub records: Vec<TableRecord>,
}
