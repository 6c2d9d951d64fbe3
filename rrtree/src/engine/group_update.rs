//! Buffer emptying: batched, recursive application of buffered operations to
//! the disk tree.
//!
//! An emptying groups the buffer by the children of the root, lets the push-down
//! strategy pick the groups to apply now, and recurses into the chosen children
//! with [`GroupUpdater::group_update`]. Every recursion level works on a loaded
//! copy of its node and returns the nodes replacing it, already split to
//! capacity; the caller stores them and integrates them into its own copy.
//!
//! Integration of a single result follows the shape of the child:
//! - an empty child disappears,
//! - a child left alone in an emptied parent replaces the parent,
//! - an underflowing child is merged into a sibling subtree,
//! - any other child is re-inserted, possibly deeper when it lost levels.
//!
//! When an integration changes the children of a node, the groups not yet
//! applied are routed again against the new children (a restart).

use std::collections::HashSet;

use log::{debug, warn};

use crate::buffer::RRTreeBuffer;
use crate::container::NodeId;
use crate::disk_tree::{ChildRef, DiskTree, Node, RecursiveTwoWaySplitter, TreeFlavor};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::geometry::Rect;
use crate::group_maker::{GroupMakerKind, OperationGroupMaker};
use crate::group_map::{GroupKey, IndexEntryOpGroupMap};
use crate::operation::{Entry, Item, OperationGroup};
use crate::piggyback::{LeafNodePiggybacker, PiggybackKind};
use crate::push_down::{PushDownContext, PushDownStats, PushDownStrategy};
use crate::stats::RRTreeStats;
use crate::tracer::{ObjectTracer, TraceOperation};

/// Piggybacking and leaf options of an emptying
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateSettings {
    pub index_piggybacking: bool,
    pub leaf_piggybacking: bool,
    pub epsilon: f64,
    pub insertion_removes_old_insertion: bool,
}

pub(crate) struct GroupUpdater<'a> {
    pub tree: &'a mut DiskTree,
    pub buffer: &'a mut RRTreeBuffer,
    pub group_maker: &'a mut OperationGroupMaker,
    pub splitter: &'a RecursiveTwoWaySplitter,
    pub strategy: PushDownStrategy,
    pub grouping: GroupMakerKind,
    pub push_down_stats: &'a mut PushDownStats,
    pub stats: &'a mut RRTreeStats,
    pub tracer: &'a mut dyn ObjectTracer,
    pub settings: UpdateSettings,
    /// Data tree: deletions already applied during this emptying
    pub completed_deletions: Option<HashSet<Item>>,
    /// Data tree: deletions dropped as not found
    pub dropped_deletions: u64,
}

impl GroupUpdater<'_> {
    fn new_completed_deletions(&self) -> Option<HashSet<Item>> {
        match self.tree.flavor() {
            TreeFlavor::Data => Some(HashSet::new()),
            TreeFlavor::Update => None,
        }
    }

    /// Empties the buffer, entirely when `force_full` is set or the tree has no
    /// index level.
    pub fn empty_buffer(&mut self, force_full: bool) -> RRTreeResult<()> {
        self.stats.register_empty_buffer();
        self.completed_deletions = self.new_completed_deletions();
        let all = self.buffer.flatten();
        debug!(
            "emptying buffer of {} operations, root level {}, force full = {}",
            all.len(),
            self.tree.root_level(),
            force_full
        );

        if force_full || self.tree.root_level() == 0 {
            let siblings = self.empty_everything(all)?;
            self.tree.grow_tree(siblings, self.splitter)?;
        } else {
            let root = self.tree.root_node()?;
            let groups = self
                .group_maker
                .make_groups_as(self.grouping, &root, &all)?;
            let orphans = groups.get(&GroupKey::Orphan).map_or(0, |g| g.len());
            let siblings = if orphans == all.len() {
                warn!(
                    "no buffered operation can descend below the root, emptying everything"
                );
                self.stats.register_failed_emptying();
                self.empty_everything(all)?
            } else {
                self.select_and_execute(root, groups)?
            };
            self.tree.grow_tree(siblings, self.splitter)?;

            if self.buffer.is_full() && !self.buffer.is_empty() {
                warn!(
                    "buffer still full after a partial emptying, emptying everything"
                );
                self.stats.register_failed_emptying();
                let remaining = self.buffer.flatten();
                let siblings = self.empty_everything(remaining)?;
                self.tree.grow_tree(siblings, self.splitter)?;
            }
        }

        self.completed_deletions = None;
        self.stats.register_end_of_empty_buffer();
        debug!(
            "buffer emptied: {} operations left, tree height {}",
            self.buffer.current_size(),
            self.tree.height()
        );
        Ok(())
    }

    fn select_and_execute(
        &mut self,
        root: Node,
        groups: IndexEntryOpGroupMap,
    ) -> RRTreeResult<Vec<Node>> {
        let ctx = self.context(&root, false);
        let mut selection = self.strategy.choose(groups, &ctx, self.push_down_stats);
        selection
            .buffer
            .move_group_from(&mut selection.push, GroupKey::Orphan);

        if self.strategy.will_empty_big_part_of_buffer() {
            self.buffer.clear();
            self.put_groups_back_to_buffer(&selection.buffer, root.level())?;
        } else {
            self.buffer.remove_group(&selection.push.flatten());
        }
        self.group_update_map(root, selection.push)
    }

    /// Applies every buffered operation, overriding the push-down strategy.
    ///
    /// On a data tree deletions fan out to every leaf that may hold their item,
    /// so a deletion still unapplied afterwards deletes an absent item and is
    /// dropped.
    fn empty_everything(&mut self, all: OperationGroup) -> RRTreeResult<Vec<Node>> {
        let strategy = self.strategy;
        let grouping = self.grouping;
        self.strategy = PushDownStrategy::Everything;
        if self.tree.flavor() == TreeFlavor::Data {
            self.grouping = GroupMakerKind::Trivial;
        }
        self.completed_deletions = self.new_completed_deletions();
        self.buffer.clear();

        let root = self.tree.root_node()?;
        let result = self.group_update(root, all, false, false);

        self.strategy = strategy;
        self.grouping = grouping;
        let siblings = result?;
        if self.tree.flavor() == TreeFlavor::Data {
            self.drop_unapplied_deletions();
        }
        Ok(siblings)
    }

    fn drop_unapplied_deletions(&mut self) {
        let unapplied: Vec<Entry> = self
            .buffer
            .iter()
            .filter(|op| op.is_deletion())
            .copied()
            .collect();
        for op in &unapplied {
            self.buffer.remove_exact_entry(op);
            self.tracer
                .trace_update_tree_entry(op, TraceOperation::DropNotFoundDeletion);
            self.stats.complete_update_lifetime(op);
        }
        if !unapplied.is_empty() {
            debug!("dropped {} deletions of absent items", unapplied.len());
            self.stats.deletions_not_found += unapplied.len() as u64;
            self.dropped_deletions += unapplied.len() as u64;
        }
    }

    fn context(&self, node: &Node, restarted: bool) -> PushDownContext {
        PushDownContext {
            node_level: node.level(),
            node_size: node.len(),
            root_level: self.tree.root_level(),
            restarted,
            capacity: self.tree.capacity(),
        }
    }

    /// Applies groups already routed to the children of `node`.
    fn group_update_map(
        &mut self,
        mut node: Node,
        push: IndexEntryOpGroupMap,
    ) -> RRTreeResult<Vec<Node>> {
        if node.is_leaf() {
            self.update_leaf(&mut node, push.flatten())?;
        } else if let Some(remaining) = self.update_non_leaf(&mut node, push)? {
            self.stats.group_update_restarts += 1;
            return self.group_update(node, remaining.flatten(), false, true);
        }
        self.finish_group_update(node)
    }

    /// Applies `ops` to the subtree of `node` and returns the nodes replacing it.
    pub fn group_update(
        &mut self,
        mut node: Node,
        ops: OperationGroup,
        update_group_stats: bool,
        restarted: bool,
    ) -> RRTreeResult<Vec<Node>> {
        self.stats.group_update_invocations += 1;
        for op in &ops {
            self.tracer
                .trace_update_tree_entry(op, TraceOperation::GroupUpdateStart);
        }
        let mut ops = ops;
        if let Some(done) = &self.completed_deletions {
            ops.retain(|op| !(op.is_deletion() && done.contains(&op.item)));
        }
        if update_group_stats {
            self.stats.update_group_update_statistics(
                node.level(),
                ops.len(),
                ops.is_insertion_only(),
            );
        }

        if node.is_leaf() {
            self.update_leaf(&mut node, ops)?;
        } else {
            let mut groups = self
                .group_maker
                .make_groups_as(self.grouping, &node, &ops)?;
            if let Some(orphans) = groups.remove(&GroupKey::Orphan) {
                self.put_op_back_to_buffer(&orphans, node.level())?;
            }
            let ctx = self.context(&node, restarted);
            let selection = self.strategy.choose(groups, &ctx, self.push_down_stats);
            self.put_groups_back_to_buffer(&selection.buffer, node.level())?;

            if let Some(remaining) = self.update_non_leaf(&mut node, selection.push)? {
                self.stats.group_update_restarts += 1;
                return self.group_update(node, remaining.flatten(), false, true);
            }
        }
        self.finish_group_update(node)
    }

    fn finish_group_update(&mut self, node: Node) -> RRTreeResult<Vec<Node>> {
        if !node.is_leaf() && node.len() == 1 {
            self.stats.single_entry_nodes += 1;
            let only = node.children()[0];
            let child = self.tree.take_node(only.id)?;
            return Ok(self.splitter.split(child));
        }
        Ok(self.splitter.split(node))
    }

    /// Recurses into the children addressed by `push`.
    ///
    /// Returns the groups left unapplied when an integration changed the
    /// children of `node`.
    fn update_non_leaf(
        &mut self,
        node: &mut Node,
        push: IndexEntryOpGroupMap,
    ) -> RRTreeResult<Option<IndexEntryOpGroupMap>> {
        self.stats.non_leaf_node_updates += 1;
        let mut groups = push;
        while let Some((key, mut group)) = groups.pop_first() {
            let GroupKey::Child(child_id) = key else {
                self.put_op_back_to_buffer(&group, node.level())?;
                continue;
            };
            let child_ref = node.remove_child(child_id).ok_or_else(|| {
                RRTreeError::invariant(format!(
                    "operations routed to child {} missing from its parent",
                    child_id
                ))
            })?;
            let child = self.tree.load_node(child_id)?;

            for op in &group {
                self.tracer.trace_update_tree_entry(
                    op,
                    TraceOperation::GroupUpdateBeforeIndexPiggybacking,
                );
            }
            if self.settings.index_piggybacking {
                self.piggyback_on_index_entry(&child_ref, &mut group);
            }
            for op in &group {
                self.tracer.trace_update_tree_entry(
                    op,
                    TraceOperation::GroupUpdateAfterIndexPiggybacking,
                );
            }

            let results = self.group_update(child, group, true, false)?;
            let restart = if results.len() > 1 {
                self.stats.trivial_child_integrations += 1;
                let level = results[0].level();
                let refs = self.tree.store_nodes(&results, Some(child_id))?;
                let mut restart = false;
                for r in refs {
                    restart |= self.insert_subtree(node, r, level)?;
                }
                restart
            } else {
                let child = results.into_iter().next().unwrap_or_else(Node::empty_leaf);
                self.integrate_child(node, child, child_id)?
            };
            if restart && !groups.is_empty() {
                return Ok(Some(groups));
            }
        }
        Ok(None)
    }

    /// Adds buffered operations contained in the rectangle of a child, expanded by
    /// the piggybacking epsilon, to its group.
    fn piggyback_on_index_entry(&mut self, child: &ChildRef, group: &mut OperationGroup) {
        let region = if self.settings.epsilon > 0.0 {
            child.rect.expanded_by(self.settings.epsilon)
        } else {
            child.rect
        };
        let candidates = match self.tree.flavor() {
            TreeFlavor::Update => self.buffer.copy_query_all_ops(&region),
            TreeFlavor::Data => self.buffer.copy_query_insertions(&region),
        };
        for op in candidates {
            if !region.contains(op.rect()) || group.contains(&op) {
                continue;
            }
            self.buffer.remove_exact_entry(&op);
            self.tracer
                .trace_update_tree_entry(&op, TraceOperation::IndexNodePiggybacking);
            self.stats.nonleaf_update_piggybackings.register(&op);
            group.push(op);
        }
    }

    /// Integrates the single node replacing the child `child_id` of `node`.
    fn integrate_child(
        &mut self,
        node: &mut Node,
        child: Node,
        child_id: NodeId,
    ) -> RRTreeResult<bool> {
        self.stats.integrate_child_invocations += 1;
        if child.is_empty() {
            self.stats.empty_children += 1;
            self.tree.free_node(child_id)?;
            return Ok(false);
        }
        if node.is_empty() {
            self.stats.children_replacing_parent += 1;
            self.tree.free_node(child_id)?;
            *node = child;
            return Ok(true);
        }
        if child.underflows(&self.tree.capacity()) {
            self.tree.free_node(child_id)?;
            return self.merge_subtree(node, child);
        }
        let level = child.level();
        match self.tree.take_over_node(&child, child_id)? {
            Some(child_ref) => self.insert_subtree(node, child_ref, level),
            None => Ok(false),
        }
    }

    /// Places a stored subtree of `level` below `node`.
    fn insert_subtree(
        &mut self,
        node: &mut Node,
        subtree: ChildRef,
        level: u32,
    ) -> RRTreeResult<bool> {
        self.stats.insert_subtree_invocations += 1;
        if node.level() == level + 1 {
            node.grow(subtree);
            return Ok(false);
        }
        if node.level() <= level {
            return Err(RRTreeError::invariant(format!(
                "inserting a subtree of level {} below a node of level {}",
                level,
                node.level()
            )));
        }
        self.stats.insert_subtree_recursions += 1;
        let target = self.descend(node, &subtree.rect)?;
        let mut target_node = self.tree.load_node(target.id)?;
        self.insert_subtree(&mut target_node, subtree, level)?;
        self.replace_child(node, target_node, target.id)
    }

    /// Moves the entries of an underflowing subtree into the subtree of `node`
    /// that fits it best.
    fn merge_subtree(&mut self, node: &mut Node, subtree: Node) -> RRTreeResult<bool> {
        self.stats.merge_subtree_invocations += 1;
        let Some(rect) = subtree.compute_rect() else {
            return Ok(false);
        };
        let target = self.descend(node, &rect)?;
        let mut target_node = self.tree.load_node(target.id)?;
        if target_node.level() == subtree.level() {
            self.tree.add_entries_from(&mut target_node, subtree)?;
        } else if target_node.level() > subtree.level() {
            self.stats.merge_subtree_recursions += 1;
            self.merge_subtree(&mut target_node, subtree)?;
        } else {
            return Err(RRTreeError::invariant(format!(
                "merging a subtree of level {} into a node of level {}",
                subtree.level(),
                target_node.level()
            )));
        }
        // Annihilation on update-tree leaves can shrink the target below capacity.
        // The target id is gone, so groups still routed to it must be routed again.
        if target_node.underflows(&self.tree.capacity()) && !node.is_empty() {
            self.tree.free_node(target.id)?;
            self.merge_subtree(node, target_node)?;
            return Ok(true);
        }
        self.replace_child(node, target_node, target.id)
    }

    /// Removes and returns the child of `node` chosen for `rect`.
    fn descend(&self, node: &mut Node, rect: &Rect) -> RRTreeResult<ChildRef> {
        let target = node.choose_subtree(rect).ok_or_else(|| {
            RRTreeError::invariant(format!(
                "no child to descend into at level {}",
                node.level()
            ))
        })?;
        node.remove_child(target.id);
        Ok(target)
    }

    /// Splits and stores a modified child, adding the results back to `node`.
    /// Returns whether the child was split.
    fn replace_child(
        &mut self,
        node: &mut Node,
        child: Node,
        child_id: NodeId,
    ) -> RRTreeResult<bool> {
        let parts = self.splitter.split(child);
        let refs = self.tree.store_nodes(&parts, Some(child_id))?;
        let split = refs.len() > 1;
        for r in refs {
            node.grow(r);
        }
        Ok(split)
    }

    fn update_leaf(&mut self, node: &mut Node, ops: OperationGroup) -> RRTreeResult<()> {
        self.stats.leaf_node_updates += 1;
        for op in &ops {
            self.tracer
                .trace_update_tree_entry(op, TraceOperation::UpdateLeafNode);
        }
        let completed = self.tree.execute_ops(
            node,
            &ops,
            self.settings.insertion_removes_old_insertion,
        )?;
        for op in &completed {
            self.complete_operation(op);
        }
        let completed: HashSet<Entry> = completed.into_iter().collect();
        let uncompleted: OperationGroup = ops
            .into_iter()
            .filter(|op| !completed.contains(op))
            .collect();
        if !uncompleted.is_empty() {
            self.put_op_back_to_buffer(&uncompleted, 0)?;
        }

        if self.settings.leaf_piggybacking && !node.is_empty() {
            let mut piggybacker = LeafNodePiggybacker::new();
            piggybacker.modify(
                self.tree,
                node,
                self.buffer,
                true,
                self.settings.epsilon,
                self.stats,
                self.tracer,
            )?;
            if let Some(done) = self.completed_deletions.as_mut() {
                done.extend(
                    piggybacker
                        .piggybacked()
                        .filter(|op| op.is_deletion())
                        .map(|op| op.item),
                );
            }
            piggybacker.finalize(
                self.buffer,
                PiggybackKind::LeafUpdate,
                self.stats,
                self.tracer,
            );
        }
        Ok(())
    }

    fn complete_operation(&mut self, op: &Entry) {
        self.tracer
            .trace_update_tree_entry(op, TraceOperation::CompleteOperation);
        if op.is_deletion() {
            if let Some(done) = self.completed_deletions.as_mut() {
                done.insert(op.item);
                self.buffer.remove_exact_entry(op);
            }
        }
        self.stats.complete_update_lifetime(op);
    }

    fn put_groups_back_to_buffer(
        &mut self,
        groups: &IndexEntryOpGroupMap,
        level: u32,
    ) -> RRTreeResult<()> {
        for (_, group) in groups {
            self.put_op_back_to_buffer(group, level)?;
        }
        Ok(())
    }

    /// Returns operations that were not applied at `level` to the buffer.
    fn put_op_back_to_buffer(&mut self, group: &OperationGroup, level: u32) -> RRTreeResult<()> {
        for op in group {
            self.tracer
                .trace_update_tree_entry(op, TraceOperation::PutOpBackToBuffer);
            self.stats.register_back_to_buffer_operation(level, op);
            if op.is_deletion() && self.completed_deletions.is_some() {
                self.buffer.add_entry_if_not_exists(*op)?;
            } else {
                self.buffer.insert_entry(*op)?;
            }
        }
        self.stats.register_back_to_buffer_group(level, group.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainer;
    use crate::disk_tree::NodeCapacity;
    use crate::tracer::NullObjectTracer;

    struct Fixture {
        tree: DiskTree,
        buffer: RRTreeBuffer,
        group_maker: OperationGroupMaker,
        splitter: RecursiveTwoWaySplitter,
        push_down_stats: PushDownStats,
        stats: RRTreeStats,
        tracer: NullObjectTracer,
        grouping: GroupMakerKind,
        settings: UpdateSettings,
    }

    impl Fixture {
        fn new(flavor: TreeFlavor, min: usize, max: usize) -> Self {
            let capacity = NodeCapacity::new(min, max);
            let grouping = match flavor {
                TreeFlavor::Data => GroupMakerKind::Trivial,
                TreeFlavor::Update => GroupMakerKind::DeletionsAsInsertions,
            };
            Fixture {
                tree: DiskTree::new(Box::new(MemoryContainer::new()), flavor, capacity),
                buffer: RRTreeBuffer::new(16),
                group_maker: OperationGroupMaker::new(grouping),
                splitter: RecursiveTwoWaySplitter::new(capacity),
                push_down_stats: PushDownStats::default(),
                stats: RRTreeStats::new(),
                tracer: NullObjectTracer,
                grouping,
                settings: UpdateSettings {
                    index_piggybacking: false,
                    leaf_piggybacking: false,
                    epsilon: 0.0,
                    insertion_removes_old_insertion: false,
                },
            }
        }

        fn updater(&mut self) -> GroupUpdater<'_> {
            GroupUpdater {
                tree: &mut self.tree,
                buffer: &mut self.buffer,
                group_maker: &mut self.group_maker,
                splitter: &self.splitter,
                strategy: PushDownStrategy::Everything,
                grouping: self.grouping,
                push_down_stats: &mut self.push_down_stats,
                stats: &mut self.stats,
                tracer: &mut self.tracer,
                settings: self.settings,
                completed_deletions: None,
                dropped_deletions: 0,
            }
        }

        fn store_leaf(&mut self, entries: Vec<Entry>) -> ChildRef {
            for entry in &entries {
                self.tree.data_items += 1;
                self.tree.net_items += if entry.is_insertion() { 1 } else { -1 };
            }
            self.tree.store_node(&Node::leaf(entries)).unwrap().unwrap()
        }
    }

    fn item(id: u64, x: f64) -> Item {
        Item::new(id, Rect::point(x, x))
    }

    fn ins(id: u64, x: f64) -> Entry {
        Entry::insertion(item(id, x))
    }

    fn del(id: u64, x: f64) -> Entry {
        Entry::deletion(item(id, x))
    }

    #[test]
    fn test_cascading_merge_reroutes_pending_groups() {
        let mut f = Fixture::new(TreeFlavor::Update, 2, 4);
        let first = f.store_leaf(vec![ins(1, 0.0), ins(2, 1.0)]);
        // holds the deletion of item 2, whose insertion sits in the first leaf
        let second = f.store_leaf(vec![del(2, 1.0), ins(5, 2.0)]);
        let third = f.store_leaf(vec![ins(6, 10.0), ins(7, 11.0)]);
        let node = Node::internal(1, vec![first, second, third]);

        let mut push = IndexEntryOpGroupMap::new();
        push.add_entry(GroupKey::Child(first.id), del(1, 0.0));
        push.add_entry(GroupKey::Child(second.id), ins(8, 2.5));

        // the first leaf underflows and merges into the second, which underflows
        // in turn and merges into the third while its own group is pending
        let results = f.updater().group_update_map(node, push).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_leaf());
        let mut ids: Vec<u64> = results[0].entries().iter().map(|e| e.item.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![5, 6, 7, 8]);
        assert!(results[0].entries().iter().all(Entry::is_insertion));
        assert_eq!(f.stats.group_update_restarts, 1);
        assert_eq!(f.stats.merge_subtree_invocations, 2);
        assert_eq!(f.tree.net_items(), 4);
    }

    #[test]
    fn test_index_piggybacking_needs_containment_in_child() {
        let mut f = Fixture::new(TreeFlavor::Data, 2, 4);
        f.settings.index_piggybacking = true;
        let child = ChildRef {
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            id: 7,
        };
        let inside = Item::new(1, Rect::new(2.0, 2.0, 3.0, 3.0));
        // inside the union of group and child rectangles only
        let between = Item::new(2, Rect::new(15.0, 15.0, 16.0, 16.0));
        f.buffer.insert_with_annihilation(inside).unwrap();
        f.buffer.insert_with_annihilation(between).unwrap();
        let routed = Entry::insertion(Item::new(3, Rect::new(20.0, 20.0, 21.0, 21.0)));
        let mut group: OperationGroup = vec![routed].into();

        f.updater().piggyback_on_index_entry(&child, &mut group);
        assert!(group.contains(&Entry::insertion(inside)));
        assert!(!group.contains(&Entry::insertion(between)));
        assert!(f.buffer.query_entry(&Entry::insertion(between)).is_some());
        assert!(f.buffer.query_entry(&Entry::insertion(inside)).is_none());
        assert_eq!(f.stats.nonleaf_update_piggybackings.insertions, 1);
    }

    #[test]
    fn test_full_emptying_drops_deletions_of_absent_items() {
        let mut f = Fixture::new(TreeFlavor::Data, 2, 4);
        for id in 0..6 {
            f.buffer.insert_with_annihilation(item(id, id as f64)).unwrap();
        }
        f.updater().empty_buffer(true).unwrap();
        assert_eq!(f.tree.data_items(), 6);

        f.buffer.remove_with_annihilation(item(2, 2.0)).unwrap();
        f.buffer.remove_with_annihilation(item(40, 40.0)).unwrap();
        f.buffer.remove_with_annihilation(item(3, 9.0)).unwrap();
        let mut updater = f.updater();
        updater.empty_buffer(true).unwrap();
        assert_eq!(updater.dropped_deletions, 2);

        assert!(f.buffer.is_empty());
        assert_eq!(f.tree.data_items(), 5);
        assert_eq!(f.stats.deletions_not_found, 2);
    }

    #[test]
    fn test_partial_emptying_keeps_unapplied_deletions_buffered() {
        let mut f = Fixture::new(TreeFlavor::Data, 2, 4);
        for id in 0..12 {
            f.buffer.insert_with_annihilation(item(id, id as f64)).unwrap();
        }
        f.updater().empty_buffer(true).unwrap();
        assert!(f.tree.root_level() > 0);

        // shares the point of item 5, so it descends instead of staying an orphan
        f.buffer.remove_with_annihilation(item(50, 5.0)).unwrap();
        let mut updater = f.updater();
        updater.empty_buffer(false).unwrap();
        assert_eq!(updater.dropped_deletions, 0);
        assert!(f.buffer.query_entry(&del(50, 5.0)).is_some());
        assert_eq!(f.tree.data_items(), 12);
    }
}
