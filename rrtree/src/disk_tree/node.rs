//! Disk node records.

use crate::container::NodeId;
use crate::geometry::Rect;
use crate::operation::Entry;
use serde::{Deserialize, Serialize};

/// Minimum and maximum number of entries of a non-root node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacity {
    pub min: usize,
    pub max: usize,
}

impl NodeCapacity {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn overflows(&self, len: usize) -> bool {
        len > self.max
    }

    pub fn underflows(&self, len: usize) -> bool {
        len < self.min
    }
}

/// An index entry: a child pointer with its covering rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
    pub rect: Rect,
    pub id: NodeId,
}

/// Anything placed in a node that has a covering rectangle
pub trait HasRect {
    fn rect(&self) -> &Rect;
}

impl HasRect for ChildRef {
    fn rect(&self) -> &Rect {
        &self.rect
    }
}

impl HasRect for Entry {
    fn rect(&self) -> &Rect {
        &self.item.rect
    }
}

/// Node types in the disk tree.
///
/// Data-tree leaves only hold insertion entries; update-tree leaves hold
/// insertions and deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Leaf node containing actual entries
    Leaf { entries: Vec<Entry> },
    /// Internal node containing child references
    Internal {
        children: Vec<ChildRef>,
        level: u32, // Height from leaf level (leaves are 0)
    },
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            entries: Vec::new(),
        }
    }

    pub fn leaf(entries: Vec<Entry>) -> Self {
        Node::Leaf { entries }
    }

    pub fn internal(level: u32, children: Vec<ChildRef>) -> Self {
        debug_assert!(level > 0);
        Node::Internal { children, level }
    }

    pub fn level(&self) -> u32 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Internal { level, .. } => *level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Internal { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overflows(&self, capacity: &NodeCapacity) -> bool {
        capacity.overflows(self.len())
    }

    pub fn underflows(&self, capacity: &NodeCapacity) -> bool {
        capacity.underflows(self.len())
    }

    /// Get the rectangle enclosing all children/entries
    pub fn compute_rect(&self) -> Option<Rect> {
        match self {
            Node::Leaf { entries } => Rect::covering(entries.iter().map(|e| &e.item.rect)),
            Node::Internal { children, .. } => Rect::covering(children.iter().map(|c| &c.rect)),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        match self {
            Node::Leaf { entries } => entries,
            Node::Internal { .. } => &[],
        }
    }

    pub fn children(&self) -> &[ChildRef] {
        match self {
            Node::Leaf { .. } => &[],
            Node::Internal { children, .. } => children,
        }
    }

    pub fn contains_entry(&self, entry: &Entry) -> bool {
        self.entries().contains(entry)
    }

    /// Adds a child reference to an internal node.
    pub fn grow(&mut self, child: ChildRef) {
        if let Node::Internal { children, .. } = self {
            children.push(child);
        } else {
            debug_assert!(false, "grow called on a leaf");
        }
    }

    pub fn remove_child(&mut self, id: NodeId) -> Option<ChildRef> {
        match self {
            Node::Internal { children, .. } => {
                let pos = children.iter().position(|c| c.id == id)?;
                Some(children.remove(pos))
            }
            Node::Leaf { .. } => None,
        }
    }

    pub fn find_child(&self, id: NodeId) -> Option<&ChildRef> {
        self.children().iter().find(|c| c.id == id)
    }

    /// Child needing the least enlargement to cover `rect`, ties broken by smaller area.
    pub fn choose_subtree(&self, rect: &Rect) -> Option<ChildRef> {
        let mut best: Option<(ChildRef, f64, f64)> = None;
        for child in self.children() {
            let enlargement = child.rect.enlargement(rect);
            let area = child.rect.area();
            let better = match best {
                None => true,
                Some((_, best_enlargement, best_area)) => {
                    enlargement < best_enlargement
                        || (enlargement == best_enlargement && area < best_area)
                }
            };
            if better {
                best = Some((*child, enlargement, area));
            }
        }
        best.map(|(child, _, _)| child)
    }
}
