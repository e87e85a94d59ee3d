mod build;
mod key;
mod node;
mod tree;

pub use build::{MalformedProfile, build_tree, build_tree_from_table};
pub use key::{NodeKey, format_path};
pub use node::{NodeId, ProfileNode, Reported};
pub use tree::{DepthFirst, ProfileTree, TreeWarning};
