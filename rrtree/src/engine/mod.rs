//! The buffered R-tree engine.

mod group_update;
mod query;

use std::collections::HashSet;

use itertools::Itertools;
use log::debug;

use crate::buffer::{AnnihilationCounts, RRTreeBuffer};
use crate::config::RRTreeConfig;
use crate::container::{Container, IoCounters};
use crate::disk_tree::{check_invariants, DiskTree, RecursiveTwoWaySplitter, TreeClearIOState, TreeFlavor};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::gc::{self, GcSettings};
use crate::geometry::Rect;
use crate::group_maker::OperationGroupMaker;
use crate::operation::{Entry, Item, ItemId};
use crate::push_down::PushDownStats;
use crate::stats::{RRTreeStats, StatisticalData};
use crate::tracer::{ObjectTracer, TraceOperation};

use group_update::{GroupUpdater, UpdateSettings};
pub use query::QueryCursor;

/// A buffered R-tree over a disk tree of either flavor.
///
/// Updates go to a bounded in-memory buffer; a full buffer is emptied into the
/// disk tree with batched group updates before the next update is accepted.
/// Queries combine disk and buffer contents.
pub struct RRTree {
    config: RRTreeConfig,
    tree: DiskTree,
    buffer: RRTreeBuffer,
    group_maker: OperationGroupMaker,
    splitter: RecursiveTwoWaySplitter,
    tracer: Box<dyn ObjectTracer>,
    stats: RRTreeStats,
    push_down_stats: PushDownStats,
    /// Logical number of items, below zero while removals of absent items are
    /// buffered
    data_items: i64,
    last_update_emptied_buffer: bool,
    force_full_emptying: bool,
}

impl RRTree {
    pub(crate) fn new(
        config: RRTreeConfig,
        container: Box<dyn Container>,
        tracer: Box<dyn ObjectTracer>,
    ) -> Self {
        let capacity = config.capacity();
        RRTree {
            tree: DiskTree::new(container, config.flavor, capacity),
            buffer: RRTreeBuffer::new(config.buffer_size),
            group_maker: OperationGroupMaker::new(config.group_maker),
            splitter: RecursiveTwoWaySplitter::new(capacity),
            tracer,
            stats: RRTreeStats::new(),
            push_down_stats: PushDownStats::default(),
            data_items: 0,
            last_update_emptied_buffer: false,
            force_full_emptying: false,
            config,
        }
    }

    pub fn config(&self) -> &RRTreeConfig {
        &self.config
    }

    pub fn flavor(&self) -> TreeFlavor {
        self.config.flavor
    }

    /// Buffers the insertion of `item`.
    pub fn insert(&mut self, item: Item) -> RRTreeResult<()> {
        self.maybe_empty_buffer()?;
        self.tracer.trace_object(&item, TraceOperation::InsertToBuffer);
        self.drop_absent_deletion(&item)?;
        let old_size = self.buffer.current_size();
        let repeated = self.is_buffered(&Entry::insertion(item));
        self.buffer.insert_with_annihilation(item)?;
        self.stats.register_op_lifetime(
            Entry::insertion(item),
            old_size,
            self.buffer.current_size(),
        );
        if !repeated {
            self.data_items += 1;
        }
        self.apply_if_unbuffered()
    }

    /// Buffers the deletion of `item`.
    ///
    /// Returns the item when the deletion cancelled its pending insertion.
    pub fn remove(&mut self, item: Item) -> RRTreeResult<Option<Item>> {
        self.maybe_empty_buffer()?;
        self.tracer.trace_object(&item, TraceOperation::RemoveFromBuffer);
        let old_size = self.buffer.current_size();
        let repeated = self.is_buffered(&Entry::deletion(item));
        let annihilated = self.buffer.remove_with_annihilation(item)?;
        self.stats.register_op_lifetime(
            Entry::deletion(item),
            old_size,
            self.buffer.current_size(),
        );
        if !repeated {
            self.data_items -= 1;
        }
        self.apply_if_unbuffered()?;
        Ok(annihilated)
    }

    fn maybe_empty_buffer(&mut self) -> RRTreeResult<()> {
        self.last_update_emptied_buffer = self.buffer.is_full() && !self.buffer.is_empty();
        if self.last_update_emptied_buffer {
            self.empty_buffer()?;
        }
        self.stats.register_update();
        Ok(())
    }

    /// On a data tree a buffered deletion of an item no leaf stores must not
    /// cancel a new insertion of it.
    fn drop_absent_deletion(&mut self, item: &Item) -> RRTreeResult<()> {
        let deletion = Entry::deletion(*item);
        if self.config.flavor != TreeFlavor::Data
            || !self.is_buffered(&deletion)
            || self.disk_holds(item)?
        {
            return Ok(());
        }
        self.buffer.remove_exact_entry(&deletion);
        self.tracer
            .trace_update_tree_entry(&deletion, TraceOperation::DropNotFoundDeletion);
        self.stats.complete_update_lifetime(&deletion);
        self.stats.deletions_not_found += 1;
        // its removal was subtracted when it was buffered
        self.data_items += 1;
        Ok(())
    }

    /// A zero-size buffer applies each update as soon as it is buffered.
    fn apply_if_unbuffered(&mut self) -> RRTreeResult<()> {
        if self.buffer.max_size() == 0 && !self.buffer.is_empty() {
            self.last_update_emptied_buffer = true;
            self.empty_buffer()?;
        }
        Ok(())
    }

    fn empty_buffer(&mut self) -> RRTreeResult<()> {
        let force_full = std::mem::take(&mut self.force_full_emptying);
        let mut updater = GroupUpdater {
            tree: &mut self.tree,
            buffer: &mut self.buffer,
            group_maker: &mut self.group_maker,
            splitter: &self.splitter,
            strategy: self.config.push_down_strategy,
            grouping: self.config.group_maker,
            push_down_stats: &mut self.push_down_stats,
            stats: &mut self.stats,
            tracer: self.tracer.as_mut(),
            settings: UpdateSettings {
                index_piggybacking: self.config.enable_update_index_node_piggybacking,
                leaf_piggybacking: self.config.enable_update_leaf_node_piggybacking,
                epsilon: self.config.piggybacking_epsilon,
                insertion_removes_old_insertion: self.config.insertion_removes_old_insertion,
            },
            completed_deletions: None,
            dropped_deletions: 0,
        };
        let result = updater.empty_buffer(force_full);
        // removals of absent items were subtracted when they were buffered
        self.data_items += updater.dropped_deletions as i64;
        result
    }

    /// Empties the buffer now, whether it is full or not.
    pub fn forced_empty_buffer(&mut self) -> RRTreeResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.empty_buffer()
    }

    /// Makes the next emptying apply the whole buffer.
    pub fn on_next_eb_force_full_emptying(&mut self) {
        self.force_full_emptying = true;
    }

    /// Whether the last insert or remove emptied the buffer
    pub fn was_buffer_emptied(&self) -> bool {
        self.last_update_emptied_buffer
    }

    /// Items whose rectangle overlaps `rect`.
    ///
    /// Only level 0 (items) can be queried.
    pub fn query(&mut self, rect: &Rect, level: u32) -> RRTreeResult<QueryCursor> {
        if level != 0 {
            return Err(RRTreeError::IllegalArgument(format!(
                "only level 0 can be queried, got level {}",
                level
            )));
        }
        self.run_query(rect)
    }

    pub fn query_all(&mut self) -> RRTreeResult<QueryCursor> {
        match self.root_descriptor() {
            Some(rect) => self.run_query(&rect),
            None => Ok(QueryCursor::empty()),
        }
    }

    /// Reclaims disk space held by annihilating entries of an update tree.
    ///
    /// Vacuum works in place; rebuild replaces the tree and returns the cost of
    /// disposing of the old one.
    pub fn clean_garbage(&mut self, rebuild: bool) -> RRTreeResult<TreeClearIOState> {
        let settings = GcSettings {
            index_cache_size: self.config.gc_index_cache_size,
            scratch_mem_size: self.config.gc_initial_scratch_mem_size,
        };
        gc::clean_garbage(
            &mut self.tree,
            rebuild,
            &settings,
            &mut self.stats.gc,
            self.tracer.as_mut(),
        )
    }

    /// Rectangle covering the disk tree and every buffered operation
    pub fn root_descriptor(&self) -> Option<Rect> {
        match (self.tree.root_rect(), self.buffer.rect()) {
            (Some(disk), Some(buffered)) => Some(disk.union(&buffered)),
            (disk, buffered) => disk.or(buffered),
        }
    }

    /// Disk-resident entries per logical item
    pub fn physical_to_logical_ratio(&self) -> f32 {
        if self.data_items <= 0 {
            return f32::MAX;
        }
        self.tree.data_items() as f32 / self.data_items as f32
    }

    /// Logical number of items
    pub fn data_items(&self) -> u64 {
        self.data_items.max(0) as u64
    }

    /// Entries stored in disk leaves
    pub fn disk_data_items(&self) -> u64 {
        self.tree.data_items()
    }

    pub fn current_buffer_size(&self) -> usize {
        self.buffer.current_size()
    }

    pub fn is_buffer_full(&self) -> bool {
        self.buffer.is_full()
    }

    pub fn annihilation_counts(&self) -> AnnihilationCounts {
        self.buffer.annihilations()
    }

    /// Whether the buffer holds exactly `entry`
    pub fn is_buffered(&self, entry: &Entry) -> bool {
        self.buffer.query_entry(entry).is_some()
    }

    pub fn height(&self) -> u32 {
        self.tree.height()
    }

    pub fn io_counters(&self) -> IoCounters {
        self.tree.io_counters()
    }

    pub fn stats(&self) -> &RRTreeStats {
        &self.stats
    }

    pub fn push_down_stats(&self) -> &PushDownStats {
        &self.push_down_stats
    }

    /// Number of children each fanned-out deletion was routed to
    pub fn deletion_splits(&self) -> &StatisticalData {
        self.group_maker.deletion_splits()
    }

    /// Closes the lifetime statistics of every operation still buffered.
    pub fn register_buffer_lifetimes(&mut self) {
        self.stats.register_buffer_lifetimes();
    }

    /// Starts tracing one item through the engine.
    pub fn trace_item(&mut self, id: ItemId) -> RRTreeResult<()> {
        self.tracer.register_object(id)
    }

    /// Structural invariant violations of the disk tree, empty when it is valid.
    pub fn check_invariants(&self) -> RRTreeResult<Vec<String>> {
        check_invariants(&self.tree)
    }

    /// Compares a full query with the items expected to be present.
    pub fn verify_contents(&mut self, expected: &HashSet<Item>) -> RRTreeResult<()> {
        let actual: HashSet<Item> = self.query_all()?.collect();
        let missing = expected
            .difference(&actual)
            .sorted_by_key(|i| i.id)
            .map(|i| i.id)
            .collect_vec();
        let unexpected = actual
            .difference(expected)
            .sorted_by_key(|i| i.id)
            .map(|i| i.id)
            .collect_vec();
        if missing.is_empty() && unexpected.is_empty() {
            debug!("verified {} items", actual.len());
            return Ok(());
        }
        Err(RRTreeError::VerificationFailed {
            diff: format!("missing: {:?}, unexpected: {:?}", missing, unexpected),
        })
    }
}
