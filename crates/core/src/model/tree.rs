use std::collections::BTreeSet;

use render_profile_protocol::{ProfileMeta, SharedStr};
use serde::Serialize;

use super::{NodeId, NodeKey, ProfileNode};

/// A non-fatal inconsistency found while normalizing a profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TreeWarning {
    /// A reported total was smaller than the children's subtree sums; the
    /// node's own contribution was clamped to zero.
    TotalBelowChildren {
        path: String,
        metric: SharedStr,
        total: f64,
        children: f64,
    },
    /// A node reported both self and total and they disagree once the
    /// children are accounted for.
    InconsistentSelf {
        path: String,
        metric: SharedStr,
        reported_self: f64,
        used_self: f64,
    },
}

impl std::fmt::Display for TreeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TotalBelowChildren {
                path,
                metric,
                total,
                children,
            } => write!(
                f,
                "{path}: {metric} total {total} is below its children's sum {children}"
            ),
            Self::InconsistentSelf {
                path,
                metric,
                reported_self,
                used_self,
            } => write!(
                f,
                "{path}: {metric} self {reported_self} disagrees with the total, using {used_self}"
            ),
        }
    }
}

/// One profile's normalized hierarchy.
///
/// Nodes live in an arena in pre-order; the root is always `NodeId(0)`. The
/// tree is never mutated after construction and is shared between comparisons
/// behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileTree {
    pub(crate) meta: ProfileMeta,
    pub(crate) nodes: Vec<ProfileNode>,
    pub(crate) warnings: Vec<TreeWarning>,
}

impl ProfileTree {
    pub fn meta(&self) -> &ProfileMeta {
        &self.meta
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_node(&self) -> &ProfileNode {
        &self.nodes[0]
    }

    /// Get a node by id. Ids come from this tree, so they are always valid.
    pub fn node(&self, id: NodeId) -> &ProfileNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&ProfileNode> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn warnings(&self) -> &[TreeWarning] {
        &self.warnings
    }

    /// Deepest node depth (the root is 0).
    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(ProfileNode::depth).max().unwrap_or(0)
    }

    /// Every metric some node reports directly.
    pub fn metric_names(&self) -> BTreeSet<SharedStr> {
        self.nodes
            .iter()
            .flat_map(|n| n.self_values.keys().cloned())
            .collect()
    }

    /// Lazy pre-order walk from the root. Each call starts a fresh walk.
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: vec![self.root()],
        }
    }

    /// Look a node up by its key path. The first key must match the root.
    pub fn find(&self, path: &[NodeKey]) -> Option<NodeId> {
        let (first, rest) = path.split_first()?;
        if self.root_node().key() != first {
            return None;
        }
        let mut current = self.root();
        for key in rest {
            current = self
                .node(current)
                .children()
                .iter()
                .copied()
                .find(|&child| self.node(child).key() == key)?;
        }
        Some(current)
    }

    /// Keys from the root down to `id`, inclusive.
    pub fn key_path(&self, id: NodeId) -> Vec<NodeKey> {
        let mut keys = Vec::with_capacity(self.node(id).depth() as usize + 1);
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            keys.push(node.key().clone());
            current = node.parent();
        }
        keys.reverse();
        keys
    }
}

/// Pre-order iterator over a `ProfileTree`.
pub struct DepthFirst<'a> {
    tree: &'a ProfileTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = (NodeId, &'a ProfileNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        self.stack.extend(node.children().iter().rev().copied());
        Some((id, node))
    }
}
