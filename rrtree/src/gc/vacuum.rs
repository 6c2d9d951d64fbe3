//! Vacuum: in-place garbage collection of an update tree.
//!
//! Leaves are scanned in Hilbert order of their rectangles. For each leaf the
//! other leaves overlapping it are brought into scratch memory and opposite
//! entries spread over two leaves cancel each other. Scratch memory is bounded;
//! when a neighbour does not fit, every leaf in scratch is written back and the
//! scan continues (a partial unload). A compaction pass then removes emptied
//! leaves and merges underflowing nodes into siblings.
//!
//! Vacuum never changes what the tree logically holds: the insertion minus
//! deletion count is compared before and after the pass.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use indexmap::IndexMap;
use log::{debug, trace};
use lru::LruCache;

use super::hilbert::HilbertComparator;
use crate::constants::HILBERT_ORDER;
use crate::container::NodeId;
use crate::disk_tree::{ChildRef, DiskTree, Node, RecursiveTwoWaySplitter};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::geometry::Rect;
use crate::tracer::{ObjectTracer, TraceOperation};

/// Phase of a vacuum pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VacuumState {
    Scanning,
    PartiallyUnloading,
    Compacting,
    Finished,
}

/// Figures of one vacuum pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacuumStats {
    pub leaves_scanned: u64,
    pub annihilated_pairs: u64,
    /// Partial unloads performed
    pub partial_cleaning_iterations: u64,
    /// Leaves whose neighbour loading forced a partial unload
    pub nodes_causing_unload: u64,
    /// Modified leaves written back by partial unloads
    pub nodes_created_by_unload: u64,
    pub unloaded_entries: u64,
    pub leaves_cleaned_with_unload: u64,
    pub freed_nodes: u64,
    pub merged_nodes: u64,
    pub collapsed_roots: u64,
    pub index_nodes_before: u64,
    pub leaf_nodes_before: u64,
    /// Most leaves held in scratch memory at once
    pub peak_nodes_loaded: usize,
}

struct ScratchLeaf {
    node: Node,
    dirty: bool,
}

pub(crate) struct Vacuum<'a> {
    tree: &'a mut DiskTree,
    tracer: &'a mut dyn ObjectTracer,
    index_cache: LruCache<NodeId, Node>,
    scratch: IndexMap<NodeId, ScratchLeaf>,
    scratch_entries: usize,
    scratch_limit: usize,
    state: VacuumState,
    stats: VacuumStats,
}

impl<'a> Vacuum<'a> {
    pub(crate) fn new(
        tree: &'a mut DiskTree,
        index_cache_size: NonZeroUsize,
        scratch_limit: usize,
        tracer: &'a mut dyn ObjectTracer,
    ) -> Self {
        Self {
            tree,
            tracer,
            index_cache: LruCache::new(index_cache_size),
            scratch: IndexMap::new(),
            scratch_entries: 0,
            scratch_limit: scratch_limit.max(1),
            state: VacuumState::Scanning,
            stats: VacuumStats::default(),
        }
    }

    pub(crate) fn run(mut self) -> RRTreeResult<VacuumStats> {
        let net_before = self.tree.net_items();
        let Some(root) = self.tree.root() else {
            self.transition(VacuumState::Finished);
            return Ok(self.stats);
        };

        let mut leaves = self.collect_leaves(root)?;
        let comparator = HilbertComparator::new(root.rect, HILBERT_ORDER);
        leaves.sort_by_cached_key(|leaf| comparator.key(&leaf.rect));

        self.transition(VacuumState::Scanning);
        for leaf in &leaves {
            self.clean_leaf(leaf)?;
        }
        self.write_back()?;

        self.transition(VacuumState::Compacting);
        self.compact()?;
        self.transition(VacuumState::Finished);

        if self.tree.net_items() != net_before {
            return Err(RRTreeError::invariant(format!(
                "vacuum changed the logical content: net items {} -> {}",
                net_before,
                self.tree.net_items()
            )));
        }
        debug!(
            "vacuum done: {} leaves scanned, {} pairs annihilated, {} partial unloads",
            self.stats.leaves_scanned,
            self.stats.annihilated_pairs,
            self.stats.partial_cleaning_iterations
        );
        Ok(self.stats)
    }

    fn transition(&mut self, next: VacuumState) {
        trace!("vacuum: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn index_node(&mut self, id: NodeId) -> RRTreeResult<Node> {
        if let Some(node) = self.index_cache.get(&id) {
            return Ok(node.clone());
        }
        let node = self.tree.load_node(id)?;
        self.index_cache.put(id, node.clone());
        Ok(node)
    }

    /// References to every leaf, counting the nodes of the tree on the way.
    fn collect_leaves(&mut self, root: ChildRef) -> RRTreeResult<Vec<ChildRef>> {
        if self.tree.root_level() == 0 {
            self.stats.leaf_nodes_before = 1;
            return Ok(vec![root]);
        }
        let mut leaves = Vec::new();
        let mut stack = vec![(root.id, self.tree.root_level())];
        while let Some((id, level)) = stack.pop() {
            let node = self.index_node(id)?;
            self.stats.index_nodes_before += 1;
            for child in node.children() {
                if level == 1 {
                    leaves.push(*child);
                } else {
                    stack.push((child.id, level - 1));
                }
            }
        }
        self.stats.leaf_nodes_before = leaves.len() as u64;
        Ok(leaves)
    }

    fn intersecting_leaves(&mut self, rect: &Rect) -> RRTreeResult<Vec<NodeId>> {
        let Some(root) = self.tree.root() else {
            return Ok(Vec::new());
        };
        if self.tree.root_level() == 0 {
            return Ok(vec![root.id]);
        }
        let mut result = Vec::new();
        let mut stack = vec![(root.id, self.tree.root_level())];
        while let Some((id, level)) = stack.pop() {
            let node = self.index_node(id)?;
            for child in node.children().iter().filter(|c| c.rect.overlaps(rect)) {
                if level == 1 {
                    result.push(child.id);
                } else {
                    stack.push((child.id, level - 1));
                }
            }
        }
        Ok(result)
    }

    fn take_leaf(&mut self, id: NodeId) -> RRTreeResult<ScratchLeaf> {
        match self.scratch.swap_remove(&id) {
            Some(slot) => {
                self.scratch_entries -= slot.node.len();
                Ok(slot)
            }
            None => Ok(ScratchLeaf {
                node: self.tree.load_node(id)?,
                dirty: false,
            }),
        }
    }

    fn put_leaf(&mut self, id: NodeId, slot: ScratchLeaf) {
        self.scratch_entries += slot.node.len();
        self.scratch.insert(id, slot);
        self.stats.peak_nodes_loaded = self.stats.peak_nodes_loaded.max(self.scratch.len());
    }

    fn clean_leaf(&mut self, leaf_ref: &ChildRef) -> RRTreeResult<()> {
        self.stats.leaves_scanned += 1;
        let mut current = self.take_leaf(leaf_ref.id)?;
        let Some(rect) = current.node.compute_rect() else {
            self.put_leaf(leaf_ref.id, current);
            return Ok(());
        };

        let mut unloaded = false;
        for id in self.intersecting_leaves(&rect)? {
            if id == leaf_ref.id {
                continue;
            }
            if !self.scratch.contains_key(&id) {
                let node = self.tree.load_node(id)?;
                let needed = self.scratch_entries + current.node.len() + node.len();
                if needed > self.scratch_limit && !self.scratch.is_empty() {
                    self.partial_unload()?;
                    unloaded = true;
                }
                self.put_leaf(id, ScratchLeaf { node, dirty: false });
            }

            let Some(neighbour) = self.scratch.get_mut(&id) else {
                continue;
            };
            let cancelled = self
                .tree
                .annihilate_across(&mut current.node, &mut neighbour.node)?;
            if cancelled.is_empty() {
                continue;
            }
            neighbour.dirty = true;
            current.dirty = true;
            self.scratch_entries -= cancelled.len();
            self.stats.annihilated_pairs += cancelled.len() as u64;
            for entry in &cancelled {
                self.tracer
                    .trace_update_tree_entry(entry, TraceOperation::VacuumAnnihilation);
                self.tracer
                    .trace_update_tree_entry(&entry.opposite(), TraceOperation::VacuumAnnihilation);
            }
            if current.node.is_empty() {
                break;
            }
        }

        if unloaded {
            self.stats.leaves_cleaned_with_unload += 1;
        }
        self.put_leaf(leaf_ref.id, current);
        Ok(())
    }

    fn partial_unload(&mut self) -> RRTreeResult<()> {
        self.transition(VacuumState::PartiallyUnloading);
        self.stats.partial_cleaning_iterations += 1;
        self.stats.nodes_causing_unload += 1;
        let (written, entries) = self.write_back()?;
        self.stats.nodes_created_by_unload += written;
        self.stats.unloaded_entries += entries;
        self.transition(VacuumState::Scanning);
        Ok(())
    }

    /// Empties scratch memory, storing the leaves that changed.
    fn write_back(&mut self) -> RRTreeResult<(u64, u64)> {
        let mut written = 0;
        let mut entries = 0;
        for (id, slot) in self.scratch.drain(..) {
            entries += slot.node.len() as u64;
            if slot.dirty {
                self.tree.container_mut().update(id, &slot.node)?;
                written += 1;
            }
        }
        self.scratch_entries = 0;
        Ok((written, entries))
    }

    fn compact(&mut self) -> RRTreeResult<()> {
        self.index_cache.clear();
        let Some(root) = self.tree.root() else {
            return Ok(());
        };
        let mut root_node = self.tree.load_node(root.id)?;
        if root_node.is_leaf() {
            if root_node.is_empty() {
                self.tree.set_new_root(root_node)?;
            } else if let Some(rect) = root_node.compute_rect() {
                self.tree.set_root_rect(rect);
            }
            return Ok(());
        }

        let splitter = RecursiveTwoWaySplitter::new(self.tree.capacity());
        self.condense(&mut root_node, &splitter)?;
        while !root_node.is_leaf() && root_node.len() == 1 {
            let only = root_node.children()[0];
            root_node = self.tree.take_node(only.id)?;
            self.stats.collapsed_roots += 1;
        }
        self.tree.set_new_root(root_node)
    }

    /// Refreshes the child references of `node`, dropping empty children and
    /// merging underflowing ones into siblings.
    fn condense(&mut self, node: &mut Node, splitter: &RecursiveTwoWaySplitter) -> RRTreeResult<()> {
        let mut sizes = HashMap::new();
        for child in node.children().to_vec() {
            node.remove_child(child.id);
            let mut child_node = self.tree.load_node(child.id)?;
            if !child_node.is_leaf() {
                self.condense(&mut child_node, splitter)?;
            }
            let Some(rect) = child_node.compute_rect() else {
                self.tree.free_node(child.id)?;
                self.stats.freed_nodes += 1;
                continue;
            };
            let child_ref = if child_node.is_leaf() {
                ChildRef { rect, id: child.id }
            } else {
                match self.tree.take_over_node(&child_node, child.id)? {
                    Some(child_ref) => child_ref,
                    None => continue,
                }
            };
            sizes.insert(child.id, child_node.len());
            node.grow(child_ref);
        }
        self.merge_underflowing_children(node, &mut sizes, splitter)
    }

    fn child_sizes(&self, node: &Node) -> RRTreeResult<HashMap<NodeId, usize>> {
        let mut sizes = HashMap::with_capacity(node.len());
        for child in node.children() {
            sizes.insert(child.id, self.tree.load_node(child.id)?.len());
        }
        Ok(sizes)
    }

    fn merge_underflowing_children(
        &mut self,
        node: &mut Node,
        sizes: &mut HashMap<NodeId, usize>,
        splitter: &RecursiveTwoWaySplitter,
    ) -> RRTreeResult<()> {
        let capacity = self.tree.capacity();
        while node.len() > 1 {
            let Some(victim) = node
                .children()
                .iter()
                .find(|c| sizes.get(&c.id).is_some_and(|&len| capacity.underflows(len)))
                .copied()
            else {
                break;
            };
            node.remove_child(victim.id);
            sizes.remove(&victim.id);
            let source = self.tree.take_node(victim.id)?;
            let target = node.choose_subtree(&victim.rect).ok_or_else(|| {
                RRTreeError::invariant("no sibling to merge an underflowing node into")
            })?;
            node.remove_child(target.id);
            sizes.remove(&target.id);

            for entry in source.entries() {
                self.tracer
                    .trace_update_tree_entry(entry, TraceOperation::VacuumCompaction);
            }
            let mut merged = self.tree.load_node(target.id)?;
            self.tree.add_entries_from(&mut merged, source)?;
            if !merged.is_leaf() {
                let mut inner = self.child_sizes(&merged)?;
                self.merge_underflowing_children(&mut merged, &mut inner, splitter)?;
            }
            self.stats.merged_nodes += 1;

            let parts = splitter.split(merged);
            let refs = self.tree.store_nodes(&parts, Some(target.id))?;
            for (part, child_ref) in parts.iter().filter(|p| !p.is_empty()).zip(refs) {
                sizes.insert(child_ref.id, part.len());
                node.grow(child_ref);
            }
        }
        Ok(())
    }
}
