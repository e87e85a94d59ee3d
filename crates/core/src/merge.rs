use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{NodeId, NodeKey, ProfileNode, ProfileTree, format_path};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("at least one profile is required")]
    NoProfiles,
    #[error("baseline slot {baseline} is out of range for {count} profiles")]
    BaselineOutOfRange { baseline: usize, count: usize },
}

/// Index of a node inside a `MergedTree`. Assigned in pre-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MergedId(pub u32);

impl MergedId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One aligned position across all input profiles.
#[derive(Debug, Clone, Serialize)]
pub struct MergedNode {
    key: NodeKey,
    /// One entry per input profile; `None` marks the node as absent there.
    slots: Vec<Option<NodeId>>,
    children: Vec<MergedId>,
    parent: Option<MergedId>,
    depth: u32,
}

impl MergedNode {
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn slots(&self) -> &[Option<NodeId>] {
        &self.slots
    }

    pub fn slot(&self, slot: usize) -> Option<NodeId> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn is_present(&self, slot: usize) -> bool {
        self.slot(slot).is_some()
    }

    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn children(&self) -> &[MergedId] {
        &self.children
    }

    pub fn parent(&self) -> Option<MergedId> {
        self.parent
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

/// Several profiles aligned into one comparison tree.
///
/// Holds its inputs by `Arc`, so it stays valid however long the comparison
/// lives, independently of the session that loaded them.
#[derive(Debug, Clone)]
pub struct MergedTree {
    profiles: Vec<Arc<ProfileTree>>,
    nodes: Vec<MergedNode>,
    baseline: usize,
}

impl MergedTree {
    pub fn root(&self) -> MergedId {
        MergedId(0)
    }

    pub fn node(&self, id: MergedId) -> &MergedNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[MergedNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn profiles(&self) -> &[Arc<ProfileTree>] {
        &self.profiles
    }

    pub fn slot_count(&self) -> usize {
        self.profiles.len()
    }

    /// The slot designated as baseline when the tree was merged.
    pub fn baseline(&self) -> usize {
        self.baseline
    }

    /// The input node behind `id` in `slot`, if present there.
    pub fn profile_node(&self, id: MergedId, slot: usize) -> Option<&ProfileNode> {
        let node_id = self.node(id).slot(slot)?;
        Some(self.profiles[slot].node(node_id))
    }

    /// Merged ids in pre-order (the storage order).
    pub fn ids(&self) -> impl DoubleEndedIterator<Item = MergedId> + ExactSizeIterator + use<> {
        (0..self.nodes.len() as u32).map(MergedId)
    }

    pub fn key_path(&self, id: MergedId) -> Vec<NodeKey> {
        let mut keys = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            keys.push(node.key.clone());
            current = node.parent;
        }
        keys.reverse();
        keys
    }

    pub fn find(&self, path: &[NodeKey]) -> Option<MergedId> {
        let (first, rest) = path.split_first()?;
        if self.node(self.root()).key() != first {
            return None;
        }
        let mut current = self.root();
        for key in rest {
            current = self
                .node(current)
                .children
                .iter()
                .copied()
                .find(|&child| self.node(child).key() == key)?;
        }
        Some(current)
    }
}

/// Two siblings in one input shared a key; the later one was renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateIdentity {
    pub profile: usize,
    pub parent_path: Vec<NodeKey>,
    /// The disambiguated key the duplicate was merged under.
    pub key: NodeKey,
}

impl std::fmt::Display for DuplicateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "profile {}: duplicate sibling under {} merged as {}",
            self.profile,
            format_path(&self.parent_path),
            self.key
        )
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub tree: MergedTree,
    pub warnings: Vec<DuplicateIdentity>,
}

/// Align `trees` by structural identity.
///
/// Children are grouped per level through a key map, so the cost is linear in
/// the total number of input nodes. Roots always align. Sibling order is
/// first-seen order, visiting the baseline before the other inputs.
pub fn merge(trees: &[Arc<ProfileTree>], baseline: usize) -> Result<MergeOutput, MergeError> {
    if trees.is_empty() {
        return Err(MergeError::NoProfiles);
    }
    if baseline >= trees.len() {
        return Err(MergeError::BaselineOutOfRange {
            baseline,
            count: trees.len(),
        });
    }

    let order: Vec<usize> = std::iter::once(baseline)
        .chain((0..trees.len()).filter(|&slot| slot != baseline))
        .collect();
    let mut merger = Merger {
        trees,
        order,
        nodes: Vec::new(),
        warnings: Vec::new(),
    };

    let root_slots: Vec<Option<NodeId>> = trees.iter().map(|t| Some(t.root())).collect();
    let root_key = trees[baseline].root_node().key().clone();
    merger.push(root_key, root_slots, None, 0);

    for warning in &merger.warnings {
        log::warn!("{warning}");
    }
    log::debug!(
        "merged {} profiles into {} nodes ({} duplicate identities)",
        trees.len(),
        merger.nodes.len(),
        merger.warnings.len()
    );

    Ok(MergeOutput {
        tree: MergedTree {
            profiles: trees.to_vec(),
            nodes: merger.nodes,
            baseline,
        },
        warnings: merger.warnings,
    })
}

struct Merger<'t> {
    trees: &'t [Arc<ProfileTree>],
    order: Vec<usize>,
    nodes: Vec<MergedNode>,
    warnings: Vec<DuplicateIdentity>,
}

impl Merger<'_> {
    /// Append a merged node and, recursively, its merged children.
    fn push(
        &mut self,
        key: NodeKey,
        slots: Vec<Option<NodeId>>,
        parent: Option<MergedId>,
        depth: u32,
    ) -> MergedId {
        let id = MergedId(self.nodes.len() as u32);
        self.nodes.push(MergedNode {
            key,
            slots,
            children: Vec::new(),
            parent,
            depth,
        });

        let groups = self.group_children(id);
        let mut children = Vec::with_capacity(groups.len());
        for (key, slots) in groups {
            children.push(self.push(key, slots, Some(id), depth + 1));
        }
        self.nodes[id.index()].children = children;
        id
    }

    fn group_children(&mut self, id: MergedId) -> Vec<(NodeKey, Vec<Option<NodeId>>)> {
        let slot_count = self.trees.len();
        let mut groups: Vec<(NodeKey, Vec<Option<NodeId>>)> = Vec::new();
        let mut by_key: HashMap<NodeKey, usize> = HashMap::new();

        for &slot in &self.order {
            let Some(node_id) = self.nodes[id.index()].slots[slot] else {
                continue;
            };
            let tree = &self.trees[slot];
            let mut repeats: HashMap<&NodeKey, u32> = HashMap::new();

            for &child in tree.node(node_id).children() {
                let base = tree.node(child).key();
                let seen = repeats.entry(base).or_insert(0);
                let key = if *seen == 0 {
                    base.clone()
                } else {
                    let key = base.disambiguated(*seen);
                    self.warnings.push(DuplicateIdentity {
                        profile: slot,
                        parent_path: key_path(&self.nodes, id),
                        key: key.clone(),
                    });
                    key
                };
                *seen += 1;

                match by_key.get(&key) {
                    Some(&group) => groups[group].1[slot] = Some(child),
                    None => {
                        let mut slots = vec![None; slot_count];
                        slots[slot] = Some(child);
                        by_key.insert(key.clone(), groups.len());
                        groups.push((key, slots));
                    }
                }
            }
        }
        groups
    }
}

fn key_path(nodes: &[MergedNode], id: MergedId) -> Vec<NodeKey> {
    let mut keys = Vec::new();
    let mut current = Some(id);
    while let Some(node_id) = current {
        let node = &nodes[node_id.index()];
        keys.push(node.key.clone());
        current = node.parent;
    }
    keys.reverse();
    keys
}
