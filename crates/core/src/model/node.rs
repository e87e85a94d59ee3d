use std::collections::BTreeMap;

use render_profile_protocol::SharedStr;
use serde::{Deserialize, Serialize};

use super::NodeKey;

/// Index of a node inside its `ProfileTree`. Ids are assigned in pre-order,
/// so a parent's id is always smaller than its children's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A metric value as the source reported it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reported {
    pub self_value: Option<f64>,
    pub total: Option<f64>,
}

/// One node of a normalized profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileNode {
    pub(crate) key: NodeKey,
    pub(crate) reported: BTreeMap<SharedStr, Reported>,
    /// Own contribution per metric, after reconciling self and total. Only
    /// metrics the node reports directly appear here.
    pub(crate) self_values: BTreeMap<SharedStr, f64>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) depth: u32,
}

impl ProfileNode {
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn reported(&self) -> &BTreeMap<SharedStr, Reported> {
        &self.reported
    }

    pub fn self_value(&self, metric: &str) -> Option<f64> {
        self.self_values.get(metric).copied()
    }

    pub fn self_values(&self) -> &BTreeMap<SharedStr, f64> {
        &self.self_values
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}
