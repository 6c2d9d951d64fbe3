//! Folding of buffered operations into leaves that are visited anyway.

use indexmap::IndexSet;

use crate::buffer::RRTreeBuffer;
use crate::disk_tree::{DiskTree, Node, NodeCapacity};
use crate::errors::RRTreeResult;
use crate::operation::Entry;
use crate::stats::{OperationTypeStat, RRTreeStats};
use crate::tracer::{ObjectTracer, TraceOperation};

/// Which pass a piggybacking happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiggybackKind {
    Query,
    LeafUpdate,
    IndexUpdate,
}

impl PiggybackKind {
    fn stat(self, stats: &mut RRTreeStats) -> &mut OperationTypeStat {
        match self {
            PiggybackKind::Query => &mut stats.query_piggybackings,
            PiggybackKind::LeafUpdate => &mut stats.leaf_update_piggybackings,
            PiggybackKind::IndexUpdate => &mut stats.nonleaf_update_piggybackings,
        }
    }
}

/// Size effect of the candidate operations of one leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafPiggybackingInfo {
    increasing: usize,
    decreasing: usize,
    unpiggybackable_increasing: usize,
    unpiggybackable_decreasing: usize,
}

impl LeafPiggybackingInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_inc(&mut self) {
        self.increasing += 1;
    }

    pub fn add_dec(&mut self) {
        self.decreasing += 1;
    }

    pub fn increasing(&self) -> usize {
        self.increasing
    }

    pub fn decreasing(&self) -> usize {
        self.decreasing
    }

    /// Drops up to `by` size-increasing operations.
    pub fn limit_inc(&mut self, by: usize) {
        let by = by.min(self.increasing);
        self.increasing -= by;
        self.unpiggybackable_increasing += by;
    }

    /// Drops up to `by` size-decreasing operations.
    pub fn limit_dec(&mut self, by: usize) {
        let by = by.min(self.decreasing);
        self.decreasing -= by;
        self.unpiggybackable_decreasing += by;
    }

    /// Keeps a leaf of `size` entries within `capacity` after the operations
    /// are applied.
    pub fn limit_to(&mut self, size: usize, capacity: &NodeCapacity) {
        let potential = size + self.increasing - self.decreasing.min(size + self.increasing);
        if potential < capacity.min {
            self.limit_dec(capacity.min - potential);
        } else if potential > capacity.max {
            self.limit_inc(potential - capacity.max);
        }
    }

    pub fn node_size_change(&self) -> i64 {
        self.increasing as i64 - self.decreasing as i64
    }

    pub fn is_node_changed(&self) -> bool {
        self.increasing > 0 || self.decreasing > 0
    }

    pub fn unpiggybackable_increasing(&self) -> usize {
        self.unpiggybackable_increasing
    }

    pub fn unpiggybackable_decreasing(&self) -> usize {
        self.unpiggybackable_decreasing
    }
}

/// Piggybacks buffered operations onto leaves of one pass.
///
/// Applied operations stay in the buffer until [`finalize`](Self::finalize) so a
/// pass reads a stable buffer.
#[derive(Debug, Default)]
pub struct LeafNodePiggybacker {
    piggybacked: IndexSet<Entry>,
}

impl LeafNodePiggybacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn piggybacked(&self) -> impl Iterator<Item = &Entry> {
        self.piggybacked.iter()
    }

    pub fn len(&self) -> usize {
        self.piggybacked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.piggybacked.is_empty()
    }

    /// Applies the buffered operations fitting `node` to it.
    ///
    /// Without `allow_reorganization` the node must stay within capacity, and
    /// operations beyond the headroom are left in the buffer. Returns whether
    /// the node changed.
    #[allow(clippy::too_many_arguments)]
    pub fn modify(
        &mut self,
        tree: &mut DiskTree,
        node: &mut Node,
        buffer: &RRTreeBuffer,
        allow_reorganization: bool,
        epsilon: f64,
        stats: &mut RRTreeStats,
        tracer: &mut dyn ObjectTracer,
    ) -> RRTreeResult<bool> {
        let Some(rect) = node.compute_rect() else {
            return Ok(false);
        };
        let expand = allow_reorganization && epsilon > 0.0;
        let descriptor = if expand { rect.expanded_by(epsilon) } else { rect };

        let candidates: Vec<Entry> = tree
            .select_fitting(node, &buffer.query_entry_of_any_type(&descriptor), expand)
            .into_iter()
            .filter(|e| !self.piggybacked.contains(e))
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }

        let mut info = LeafPiggybackingInfo::new();
        for op in &candidates {
            if tree.will_increase_node_size(node, op) {
                info.add_inc();
            } else {
                info.add_dec();
            }
        }
        if !allow_reorganization {
            info.limit_to(node.len(), &tree.capacity());
            stats.non_piggybacked_size_increasing_ops += info.unpiggybackable_increasing() as u64;
            stats.non_piggybacked_size_decreasing_ops += info.unpiggybackable_decreasing() as u64;
        }
        if !info.is_node_changed() {
            return Ok(false);
        }

        let executed = tree.execute_constrained_subset(
            node,
            &candidates,
            info.increasing(),
            info.decreasing(),
        )?;
        for op in &executed {
            tracer.trace_update_tree_entry(op, TraceOperation::LeafNodePiggybacking);
        }
        let changed = !executed.is_empty();
        self.piggybacked.extend(executed);
        Ok(changed)
    }

    /// Removes the piggybacked operations from the buffer and completes them.
    pub fn finalize(
        self,
        buffer: &mut RRTreeBuffer,
        kind: PiggybackKind,
        stats: &mut RRTreeStats,
        tracer: &mut dyn ObjectTracer,
    ) {
        for op in self.piggybacked {
            kind.stat(stats).register(&op);
            tracer.trace_update_tree_entry(&op, TraceOperation::CompleteOperation);
            stats.complete_update_lifetime(&op);
            buffer.remove_exact_entry(&op);
        }
    }
}
