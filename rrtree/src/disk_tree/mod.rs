//! The disk-resident part of the index: nodes, the tree over a container,
//! the flavor-specific leaf semantics, and the node splitter.

mod checker;
mod leaf;
mod node;
mod splitter;
mod tree;

pub use checker::check_invariants;
pub use node::{ChildRef, HasRect, Node, NodeCapacity};
pub use splitter::RecursiveTwoWaySplitter;
pub use tree::{DiskTree, TreeClearIOState, TreeFlavor};
