//! Disk-resident R-tree addressed through a block container.

use log::debug;

use super::node::{ChildRef, Node, NodeCapacity};
use super::splitter::RecursiveTwoWaySplitter;
use crate::container::{Container, IoCounters, NodeId};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::geometry::Rect;

/// Leaf semantics of a disk tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFlavor {
    /// Leaves store raw items; deletions physically remove them
    Data,
    /// Leaves store insertion and deletion entries that annihilate each other
    Update,
}

impl TreeFlavor {
    /// Whether deletions are stored in leaves like insertions
    pub fn deletions_like_insertions(self) -> bool {
        self == TreeFlavor::Update
    }
}

/// Cost of disposing of a tree: pages read and pages removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeClearIOState {
    pub reads: u64,
    pub writes: u64,
}

/// The persistent R-tree below the buffer.
///
/// Nodes live in the container and are addressed by [`NodeId`]; parent/child
/// links are child references, never in-memory pointers. Algorithms load a node,
/// modify the loaded copy, and store it back under the same or a new id.
pub struct DiskTree {
    container: Box<dyn Container>,
    flavor: TreeFlavor,
    capacity: NodeCapacity,
    root: Option<ChildRef>,
    root_level: u32,
    /// Entries stored in leaves
    pub(crate) data_items: u64,
    /// Insertions minus deletions stored in leaves
    pub(crate) net_items: i64,
}

impl DiskTree {
    pub fn new(container: Box<dyn Container>, flavor: TreeFlavor, capacity: NodeCapacity) -> Self {
        Self {
            container,
            flavor,
            capacity,
            root: None,
            root_level: 0,
            data_items: 0,
            net_items: 0,
        }
    }

    pub fn flavor(&self) -> TreeFlavor {
        self.flavor
    }

    pub fn capacity(&self) -> NodeCapacity {
        self.capacity
    }

    pub fn root(&self) -> Option<ChildRef> {
        self.root
    }

    pub fn root_rect(&self) -> Option<Rect> {
        self.root.map(|r| r.rect)
    }

    /// Level of the root node, 0 for an empty tree or a single leaf
    pub fn root_level(&self) -> u32 {
        self.root_level
    }

    /// Number of levels, 0 for an empty tree
    pub fn height(&self) -> u32 {
        if self.root.is_some() {
            self.root_level + 1
        } else {
            0
        }
    }

    pub fn data_items(&self) -> u64 {
        self.data_items
    }

    pub fn net_items(&self) -> i64 {
        self.net_items
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn io_counters(&self) -> IoCounters {
        self.container.counters()
    }

    pub(crate) fn container(&self) -> &dyn Container {
        self.container.as_ref()
    }

    pub fn load_node(&self, id: NodeId) -> RRTreeResult<Node> {
        self.container.get(id)
    }

    /// The root node, or an empty leaf for an empty tree
    pub fn root_node(&self) -> RRTreeResult<Node> {
        match self.root {
            Some(root) => self.container.get(root.id),
            None => Ok(Node::empty_leaf()),
        }
    }

    /// Loads a node and frees its record.
    pub fn take_node(&mut self, id: NodeId) -> RRTreeResult<Node> {
        let node = self.container.get(id)?;
        self.container.remove(id)?;
        Ok(node)
    }

    pub fn free_node(&mut self, id: NodeId) -> RRTreeResult<()> {
        self.container.remove(id)
    }

    fn check_storable(&self, node: &Node) -> RRTreeResult<()> {
        if node.overflows(&self.capacity) {
            return Err(RRTreeError::invariant(format!(
                "storing an overflowing node, entries = {}",
                node.len()
            )));
        }
        Ok(())
    }

    /// Stores a node under a new id. Empty nodes are not stored.
    pub fn store_node(&mut self, node: &Node) -> RRTreeResult<Option<ChildRef>> {
        let Some(rect) = node.compute_rect() else {
            return Ok(None);
        };
        self.check_storable(node)?;
        let id = self.container.insert(node)?;
        Ok(Some(ChildRef { rect, id }))
    }

    /// Stores a node under the id of an existing record.
    ///
    /// An empty node frees the record instead and yields `None`.
    pub fn take_over_node(&mut self, node: &Node, id: NodeId) -> RRTreeResult<Option<ChildRef>> {
        let Some(rect) = node.compute_rect() else {
            self.container.remove(id)?;
            return Ok(None);
        };
        self.check_storable(node)?;
        self.container.update(id, node)?;
        Ok(Some(ChildRef { rect, id }))
    }

    /// Stores the result of updating or splitting a node.
    ///
    /// The first node takes over `original`, the others get new ids.
    pub fn store_nodes(
        &mut self,
        nodes: &[Node],
        original: Option<NodeId>,
    ) -> RRTreeResult<Vec<ChildRef>> {
        let mut refs = Vec::with_capacity(nodes.len());
        let mut original = original;
        for node in nodes {
            let stored = match original.take() {
                Some(id) => self.take_over_node(node, id)?,
                None => self.store_node(node)?,
            };
            refs.extend(stored);
        }
        if let Some(id) = original {
            self.container.remove(id)?;
        }
        Ok(refs)
    }

    /// Makes `node` the root, reusing the current root record when there is one.
    pub fn set_new_root(&mut self, node: Node) -> RRTreeResult<()> {
        let new_root = match self.root.take() {
            Some(old) => self.take_over_node(&node, old.id)?,
            None => self.store_node(&node)?,
        };
        self.root_level = if new_root.is_some() { node.level() } else { 0 };
        self.root = new_root;
        Ok(())
    }

    /// Puts the nodes resulting from a root update on disk, adding new root
    /// levels while more than one sibling remains.
    pub fn grow_tree(
        &mut self,
        mut siblings: Vec<Node>,
        splitter: &RecursiveTwoWaySplitter,
    ) -> RRTreeResult<()> {
        while siblings.len() > 1 {
            let level = siblings[0].level() + 1;
            let original = self.root.take().map(|r| r.id);
            let refs = self.store_nodes(&siblings, original)?;
            let new_root = Node::internal(level, refs);
            siblings = splitter.split(new_root);
            debug!("grew disk tree to level {}, {} siblings", level, siblings.len());
        }
        match siblings.pop() {
            Some(root) => self.set_new_root(root),
            None => Ok(()),
        }
    }

    /// Ids of leaves whose rectangle overlaps `rect`
    pub fn fetch_intersecting_leaf_ids(&self, rect: &Rect) -> RRTreeResult<Vec<NodeId>> {
        let mut result = Vec::new();
        let Some(root) = self.root else {
            return Ok(result);
        };
        if !root.rect.overlaps(rect) {
            return Ok(result);
        }
        let mut stack = vec![(root.id, self.root_level)];
        while let Some((id, level)) = stack.pop() {
            if level == 0 {
                result.push(id);
                continue;
            }
            let node = self.container.get(id)?;
            for child in node.children() {
                if child.rect.overlaps(rect) {
                    stack.push((child.id, level - 1));
                }
            }
        }
        Ok(result)
    }

    /// Visits every node depth-first, parents before children.
    ///
    /// The visitor receives the node id, the node, and the child reference of the
    /// node in its parent (`None` for the root).
    pub fn visit_nodes<F>(&self, mut visitor: F) -> RRTreeResult<()>
    where
        F: FnMut(NodeId, &Node, Option<&ChildRef>) -> RRTreeResult<()>,
    {
        let Some(root) = self.root else {
            return Ok(());
        };
        let mut stack: Vec<(ChildRef, bool)> = vec![(root, true)];
        while let Some((child_ref, is_root)) = stack.pop() {
            let node = self.container.get(child_ref.id)?;
            visitor(child_ref.id, &node, if is_root { None } else { Some(&child_ref) })?;
            for child in node.children().iter().rev() {
                stack.push((*child, false));
            }
        }
        Ok(())
    }

    /// Removes every node of the tree, counting the I/O spent.
    ///
    /// Clearing must neither insert nor update records; doing so is reported as
    /// an invariant violation.
    pub fn clear_with_io_count(&mut self) -> RRTreeResult<TreeClearIOState> {
        let before = self.container.counters();
        let mut ids = Vec::new();
        self.visit_nodes(|id, _, _| {
            ids.push(id);
            Ok(())
        })?;
        for id in ids {
            self.container.remove(id)?;
        }
        let delta = self.container.counters().since(&before);
        if delta.inserts != 0 || delta.updates != 0 {
            return Err(RRTreeError::invariant(format!(
                "tree clear performed unaccounted writes: {:?}",
                delta
            )));
        }
        self.root = None;
        self.root_level = 0;
        self.data_items = 0;
        self.net_items = 0;
        debug!("cleared disk tree: {} reads, {} removes", delta.gets, delta.removes);
        Ok(TreeClearIOState {
            reads: delta.gets,
            writes: delta.removes,
        })
    }

    /// Replaces the tree with an already stored root, as produced by a bulk load.
    pub(crate) fn install_root(
        &mut self,
        root: Option<ChildRef>,
        root_level: u32,
        data_items: u64,
        net_items: i64,
    ) {
        self.root = root;
        self.root_level = if root.is_some() { root_level } else { 0 };
        self.data_items = data_items;
        self.net_items = net_items;
    }

    /// Updates the covering rectangle of the root after an in-place change.
    pub(crate) fn set_root_rect(&mut self, rect: Rect) {
        if let Some(root) = self.root.as_mut() {
            root.rect = rect;
        }
    }

    pub(crate) fn container_mut(&mut self) -> &mut dyn Container {
        self.container.as_mut()
    }
}
