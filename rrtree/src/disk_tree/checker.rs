//! Structural invariant checks over a whole disk tree.

use std::collections::HashSet;

use super::node::Node;
use super::tree::DiskTree;
use crate::container::NodeId;
use crate::errors::RRTreeResult;

/// Walks the tree and returns a description of every violated invariant.
///
/// Checked invariants:
/// - every node is reachable once and the container holds no other record
/// - child levels are one below their parent
/// - no node overflows, no non-root node underflows
/// - an index root has more than one child
/// - each child reference covers the node it points to
/// - update-tree leaves hold no annihilating pair
/// - the leaf entry count matches the tree counters
pub fn check_invariants(tree: &DiskTree) -> RRTreeResult<Vec<String>> {
    let capacity = tree.capacity();
    let update_tree = tree.flavor().deletions_like_insertions();
    let mut violations = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut leaf_entries = 0u64;
    let mut net = 0i64;

    let Some(root) = tree.root() else {
        if !tree.container().is_empty() {
            violations.push(format!(
                "empty tree but container holds {} records",
                tree.container().len()
            ));
        }
        return Ok(violations);
    };

    let root_node = tree.load_node(root.id)?;
    if root_node.level() != tree.root_level() {
        violations.push(format!(
            "root level {} differs from recorded level {}",
            root_node.level(),
            tree.root_level()
        ));
    }
    if !root_node.is_leaf() && root_node.len() < 2 {
        violations.push(format!("index root has {} children", root_node.len()));
    }

    tree.visit_nodes(|id, node, parent_ref| {
        if !seen.insert(id) {
            violations.push(format!("node {} reachable more than once", id));
        }
        if node.overflows(&capacity) {
            violations.push(format!("node {} overflows with {} entries", id, node.len()));
        }
        if parent_ref.is_some() && node.underflows(&capacity) {
            violations.push(format!("node {} underflows with {} entries", id, node.len()));
        }
        match node.compute_rect() {
            Some(rect) => {
                let covering = parent_ref.map(|p| p.rect).unwrap_or(root.rect);
                if !covering.contains(&rect) {
                    violations.push(format!(
                        "reference to node {} ({}) does not cover its content ({})",
                        id, covering, rect
                    ));
                }
            }
            None => violations.push(format!("node {} is empty", id)),
        }
        match node {
            Node::Leaf { entries } => {
                leaf_entries += entries.len() as u64;
                for entry in entries {
                    net += if entry.is_insertion() { 1 } else { -1 };
                    if update_tree && entries.contains(&entry.opposite()) && entry.is_insertion() {
                        violations.push(format!(
                            "leaf {} holds both operations on item {}",
                            id, entry.item.id
                        ));
                    }
                    if !update_tree && entry.is_deletion() {
                        violations.push(format!("data leaf {} holds a deletion", id));
                    }
                }
            }
            Node::Internal { level, .. } => {
                for child in node.children() {
                    let child_node = tree.load_node(child.id)?;
                    if child_node.level() + 1 != *level {
                        violations.push(format!(
                            "child {} of level {} under node {} of level {}",
                            child.id,
                            child_node.level(),
                            id,
                            level
                        ));
                    }
                }
            }
        }
        Ok(())
    })?;

    if seen.len() != tree.container().len() {
        violations.push(format!(
            "{} reachable nodes but container holds {} records",
            seen.len(),
            tree.container().len()
        ));
    }
    if leaf_entries != tree.data_items() {
        violations.push(format!(
            "{} leaf entries but tree counts {}",
            leaf_entries,
            tree.data_items()
        ));
    }
    if net != tree.net_items() {
        violations.push(format!("net leaf items {} but tree counts {}", net, tree.net_items()));
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainer;
    use crate::disk_tree::{NodeCapacity, RecursiveTwoWaySplitter, TreeFlavor};
    use crate::geometry::Rect;
    use crate::operation::{Entry, Item};

    fn leaf(ids: std::ops::Range<u64>) -> Node {
        Node::leaf(
            ids.map(|i| Entry::insertion(Item::new(i, Rect::point(i as f64, 0.0))))
                .collect(),
        )
    }

    #[test]
    fn test_valid_tree_has_no_violations() {
        let mut tree = DiskTree::new(
            Box::new(MemoryContainer::new()),
            TreeFlavor::Data,
            NodeCapacity::new(2, 4),
        );
        let splitter = RecursiveTwoWaySplitter::new(tree.capacity());
        tree.grow_tree(vec![leaf(0..3), leaf(3..6), leaf(6..8)], &splitter)
            .unwrap();
        tree.data_items = 8;
        tree.net_items = 8;
        assert!(check_invariants(&tree).unwrap().is_empty());
    }

    #[test]
    fn test_detects_underflow_and_counter_mismatch() {
        let mut tree = DiskTree::new(
            Box::new(MemoryContainer::new()),
            TreeFlavor::Data,
            NodeCapacity::new(2, 4),
        );
        let splitter = RecursiveTwoWaySplitter::new(tree.capacity());
        tree.grow_tree(vec![leaf(0..3), leaf(3..4)], &splitter).unwrap();
        let violations = check_invariants(&tree).unwrap();
        assert!(violations.iter().any(|v| v.contains("underflows")));
        assert!(violations.iter().any(|v| v.contains("leaf entries")));
    }

    #[test]
    fn test_detects_annihilating_pair() {
        let mut tree = DiskTree::new(
            Box::new(MemoryContainer::new()),
            TreeFlavor::Update,
            NodeCapacity::new(1, 4),
        );
        let item = Item::new(1, Rect::point(0.0, 0.0));
        tree.set_new_root(Node::leaf(vec![Entry::insertion(item), Entry::deletion(item)]))
            .unwrap();
        tree.data_items = 2;
        let violations = check_invariants(&tree).unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("both operations"));
    }
}
