//! Garbage collection of update trees.
//!
//! Deferred deletions in an update tree are stored next to the insertions they
//! cancel only when both meet in the same leaf. Pairs spread over different
//! leaves, and tombstones of items long gone, inflate the tree. Two collectors
//! reclaim that space without changing what a query returns:
//!
//! - [`vacuum`] cancels pairs across overlapping leaves and compacts the tree
//!   in place, within a bounded scratch memory
//! - [`rebuild`] reconstructs the whole tree from its live insertions
//!
//! Data trees apply deletions physically and never hold garbage, so both modes
//! are no-ops there.

mod hilbert;
mod rebuild;
mod vacuum;

use std::num::NonZeroUsize;

use log::info;

pub use hilbert::{hilbert_key, HilbertComparator};
pub use rebuild::RebuildStats;
pub use vacuum::{VacuumState, VacuumStats};

use crate::disk_tree::{DiskTree, TreeClearIOState};
use crate::errors::RRTreeResult;
use crate::stats::GcStats;
use crate::tracer::ObjectTracer;

/// Memory bounds of a collection pass
#[derive(Debug, Clone, Copy)]
pub struct GcSettings {
    /// Index nodes kept in the vacuum LRU cache
    pub index_cache_size: NonZeroUsize,
    /// Entries held in scratch memory at once
    pub scratch_mem_size: usize,
}

fn count_nodes(tree: &DiskTree) -> RRTreeResult<(u64, u64)> {
    let mut index = 0;
    let mut leaves = 0;
    tree.visit_nodes(|_, node, _| {
        if node.is_leaf() {
            leaves += 1;
        } else {
            index += 1;
        }
        Ok(())
    })?;
    Ok((index, leaves))
}

/// Runs one collection pass over `tree`, vacuum or rebuild.
///
/// Rebuild returns the I/O of disposing of the old tree. Vacuum returns the
/// pages it read and the records it freed.
pub fn clean_garbage(
    tree: &mut DiskTree,
    rebuild: bool,
    settings: &GcSettings,
    stats: &mut GcStats,
    tracer: &mut dyn ObjectTracer,
) -> RRTreeResult<TreeClearIOState> {
    if !tree.flavor().deletions_like_insertions() {
        return Ok(TreeClearIOState::default());
    }

    if rebuild {
        let (cleared, run) = rebuild::rebuild(tree, settings.scratch_mem_size, tracer)?;
        stats.index_nodes_before.register(run.index_nodes_before as f64);
        stats.leaf_nodes_before.register(run.leaf_nodes_before as f64);
        stats.index_nodes_after.register(run.index_nodes_after as f64);
        stats.leaf_nodes_after.register(run.leaf_nodes_after as f64);
        stats.run_write_ios.register(run.run_write_ios as f64);
        stats.run_read_ios.register(run.run_read_ios as f64);
        info!(
            "rebuild: {} live entries, cleared {} reads / {} writes",
            tree.data_items(),
            cleared.reads,
            cleared.writes
        );
        return Ok(cleared);
    }

    let before = tree.io_counters();
    let pass = vacuum::Vacuum::new(
        tree,
        settings.index_cache_size,
        settings.scratch_mem_size,
        tracer,
    )
    .run()?;
    let delta = tree.io_counters().since(&before);
    let state = TreeClearIOState {
        reads: delta.gets,
        writes: delta.removes,
    };

    let (index_after, leaves_after) = count_nodes(tree)?;
    stats
        .partial_unload_created_nodes
        .register(pass.nodes_created_by_unload as f64);
    if pass.nodes_causing_unload > 0 {
        stats
            .partial_unload_ratio
            .register(pass.nodes_created_by_unload as f64 / pass.nodes_causing_unload as f64);
    }
    if pass.leaves_scanned > 0 {
        stats
            .part_of_tree_cleaned_with_unload
            .register(pass.leaves_cleaned_with_unload as f64 / pass.leaves_scanned as f64);
    }
    stats.unloaded_entries.register(pass.unloaded_entries as f64);
    stats
        .partial_cleaning_iterations
        .register(pass.partial_cleaning_iterations as f64);
    stats.index_nodes_before.register(pass.index_nodes_before as f64);
    stats.leaf_nodes_before.register(pass.leaf_nodes_before as f64);
    stats.index_nodes_after.register(index_after as f64);
    stats.leaf_nodes_after.register(leaves_after as f64);
    stats.peak_nodes_loaded_at_once = stats.peak_nodes_loaded_at_once.max(pass.peak_nodes_loaded);
    info!(
        "vacuum: {} pairs annihilated, {} -> {} leaves",
        pass.annihilated_pairs, pass.leaf_nodes_before, leaves_after
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainer;
    use crate::disk_tree::{NodeCapacity, TreeFlavor};
    use crate::tracer::NullObjectTracer;

    fn settings() -> GcSettings {
        GcSettings {
            index_cache_size: NonZeroUsize::new(4).unwrap(),
            scratch_mem_size: 32,
        }
    }

    #[test]
    fn test_data_tree_is_untouched() {
        let mut tree = DiskTree::new(
            Box::new(MemoryContainer::new()),
            TreeFlavor::Data,
            NodeCapacity::new(2, 4),
        );
        let mut stats = GcStats::default();
        let mut tracer = NullObjectTracer;
        for rebuild in [false, true] {
            let state = clean_garbage(&mut tree, rebuild, &settings(), &mut stats, &mut tracer).unwrap();
            assert_eq!(state, TreeClearIOState { reads: 0, writes: 0 });
        }
        assert_eq!(stats.leaf_nodes_before.count, 0);
    }

    #[test]
    fn test_empty_update_tree_costs_nothing() {
        let mut tree = DiskTree::new(
            Box::new(MemoryContainer::new()),
            TreeFlavor::Update,
            NodeCapacity::new(2, 4),
        );
        let mut stats = GcStats::default();
        let mut tracer = NullObjectTracer;
        for rebuild in [false, true] {
            let state = clean_garbage(&mut tree, rebuild, &settings(), &mut stats, &mut tracer).unwrap();
            assert_eq!(state, TreeClearIOState::default());
        }
        assert_eq!(tree.io_counters().writes(), 0);
    }
}
