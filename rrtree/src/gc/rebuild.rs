//! Rebuild: reconstruction of an update tree from its live entries.
//!
//! The old tree is read leaf by leaf into runs of at most the scratch memory
//! size. Opposite entries within a run cancel, and each run is sorted by Hilbert
//! key and encoded as it would be written to temporary storage. The old tree is
//! then cleared, the runs are merged with cross-run annihilation, and the
//! surviving insertions are bulk-loaded bottom-up into a fresh tree.

use bincode::config;
use itertools::Itertools;
use log::debug;

use super::hilbert::HilbertComparator;
use crate::constants::{HILBERT_ORDER, IO_BLOCK_SIZE, REBUILD_FILL_FACTOR};
use crate::disk_tree::{ChildRef, DiskTree, Node, NodeCapacity, TreeClearIOState};
use crate::entry_collection::EntryCollection;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::Entry;
use crate::tracer::{ObjectTracer, TraceOperation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub runs: u64,
    pub collected_entries: u64,
    pub annihilated_in_runs: u64,
    pub annihilated_in_merge: u64,
    /// Deletions without a matching insertion, not carried into the new tree
    pub dropped_deletions: u64,
    pub run_write_ios: u64,
    pub run_read_ios: u64,
    pub index_nodes_before: u64,
    pub leaf_nodes_before: u64,
    pub index_nodes_after: u64,
    pub leaf_nodes_after: u64,
}

type Keyed = (u64, Entry);

fn io_blocks(bytes: usize) -> u64 {
    bytes.div_ceil(IO_BLOCK_SIZE).max(1) as u64
}

fn write_run(
    collection: EntryCollection,
    comparator: &HilbertComparator,
    stats: &mut RebuildStats,
    tracer: &mut dyn ObjectTracer,
) -> RRTreeResult<Vec<u8>> {
    let mut run: Vec<Keyed> = collection
        .into_entries()
        .into_iter()
        .map(|entry| (comparator.key(entry.rect()), entry))
        .collect();
    run.sort_by_key(|(key, entry)| (*key, entry.item.id));
    for (_, entry) in &run {
        tracer.trace_update_tree_entry(entry, TraceOperation::RebuildRunWrite);
    }
    let bytes = bincode::serde::encode_to_vec(&run, config::standard())
        .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
    stats.runs += 1;
    stats.run_write_ios += io_blocks(bytes.len());
    Ok(bytes)
}

fn read_run(
    bytes: &[u8],
    stats: &mut RebuildStats,
    tracer: &mut dyn ObjectTracer,
) -> RRTreeResult<Vec<Keyed>> {
    let (run, _): (Vec<Keyed>, usize) = bincode::serde::decode_from_slice(bytes, config::standard())
        .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
    stats.run_read_ios += io_blocks(bytes.len());
    for (_, entry) in &run {
        tracer.trace_update_tree_entry(entry, TraceOperation::RebuildMergeRead);
    }
    Ok(run)
}

/// Splits `items` into evenly sized chunks of at most `fill` items.
///
/// Every chunk holds at least `capacity.min` items unless there is a single
/// chunk.
fn balanced_chunks<T>(items: Vec<T>, fill: usize, capacity: &NodeCapacity) -> Vec<Vec<T>> {
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }
    let wanted = n.div_ceil(fill);
    let chunks = wanted.min((n / capacity.min.max(1)).max(1)).max(1);
    let base = n / chunks;
    let extra = n % chunks;

    let mut result = Vec::with_capacity(chunks);
    let mut items = items.into_iter();
    for i in 0..chunks {
        let size = base + usize::from(i < extra);
        result.push(items.by_ref().take(size).collect());
    }
    result
}

/// Bulk-loads `entries`, already in Hilbert order, and installs the new root.
fn bulk_load(
    tree: &mut DiskTree,
    entries: Vec<Entry>,
    stats: &mut RebuildStats,
) -> RRTreeResult<()> {
    let capacity = tree.capacity();
    let fill = ((capacity.max as f64 * REBUILD_FILL_FACTOR).floor() as usize)
        .clamp(capacity.min.max(1), capacity.max);
    let items = entries.len() as u64;

    let mut refs: Vec<ChildRef> = Vec::new();
    for chunk in balanced_chunks(entries, fill, &capacity) {
        refs.extend(tree.store_node(&Node::leaf(chunk))?);
        stats.leaf_nodes_after += 1;
    }
    let mut level = 0;
    while refs.len() > 1 {
        level += 1;
        let mut parents = Vec::new();
        for chunk in balanced_chunks(refs, fill, &capacity) {
            parents.extend(tree.store_node(&Node::internal(level, chunk))?);
            stats.index_nodes_after += 1;
        }
        refs = parents;
    }
    tree.install_root(refs.pop(), level, items, items as i64);
    Ok(())
}

/// Rebuilds `tree` and returns the I/O spent clearing the old tree.
pub(crate) fn rebuild(
    tree: &mut DiskTree,
    scratch_limit: usize,
    tracer: &mut dyn ObjectTracer,
) -> RRTreeResult<(TreeClearIOState, RebuildStats)> {
    let mut stats = RebuildStats::default();
    let Some(bounds) = tree.root_rect() else {
        return Ok((TreeClearIOState::default(), stats));
    };
    let comparator = HilbertComparator::new(bounds, HILBERT_ORDER);
    let scratch_limit = scratch_limit.max(1);

    let mut runs: Vec<Vec<u8>> = Vec::new();
    let mut current = EntryCollection::new();
    tree.visit_nodes(|_, node, _| {
        if node.is_leaf() {
            stats.leaf_nodes_before += 1;
        } else {
            stats.index_nodes_before += 1;
        }
        for entry in node.entries() {
            stats.collected_entries += 1;
            if current.add(*entry, &mut *tracer) {
                stats.annihilated_in_runs += 1;
            }
            if current.len() >= scratch_limit {
                let full = std::mem::take(&mut current);
                runs.push(write_run(full, &comparator, &mut stats, &mut *tracer)?);
            }
        }
        Ok(())
    })?;
    if !current.is_empty() {
        runs.push(write_run(current, &comparator, &mut stats, &mut *tracer)?);
    }

    let cleared = tree.clear_with_io_count()?;

    let mut decoded = Vec::with_capacity(runs.len());
    for bytes in &runs {
        decoded.push(read_run(bytes, &mut stats, &mut *tracer)?);
    }
    let merged = decoded
        .into_iter()
        .kmerge_by(|a, b| (a.0, a.1.item.id) < (b.0, b.1.item.id));

    let mut live = Vec::new();
    for (_, same_item) in &merged.chunk_by(|(key, entry)| (*key, entry.item.id)) {
        let mut collection = EntryCollection::new();
        for (_, entry) in same_item {
            if collection.add(entry, &mut *tracer) {
                stats.annihilated_in_merge += 1;
                tracer.trace_update_tree_entry(&entry, TraceOperation::RebuildMergeAnnihilation);
            }
        }
        for entry in collection.into_entries() {
            if entry.is_insertion() {
                live.push(entry);
            } else {
                stats.dropped_deletions += 1;
            }
        }
    }

    bulk_load(tree, live, &mut stats)?;
    debug!(
        "rebuild done: {} runs, {} entries collected, {} leaves -> {} leaves",
        stats.runs, stats.collected_entries, stats.leaf_nodes_before, stats.leaf_nodes_after
    );
    Ok((cleared, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryContainer;
    use crate::disk_tree::{check_invariants, RecursiveTwoWaySplitter, TreeFlavor};
    use crate::geometry::Rect;
    use crate::operation::Item;
    use crate::tracer::NullObjectTracer;

    fn item(id: u64, x: f64) -> Item {
        Item::new(id, Rect::point(x, x))
    }

    fn update_tree(min: usize, max: usize) -> DiskTree {
        DiskTree::new(
            Box::new(MemoryContainer::new()),
            TreeFlavor::Update,
            NodeCapacity::new(min, max),
        )
    }

    fn build(tree: &mut DiskTree, leaves: Vec<Vec<Entry>>) {
        let splitter = RecursiveTwoWaySplitter::new(tree.capacity());
        for entry in leaves.iter().flatten() {
            tree.data_items += 1;
            tree.net_items += if entry.is_insertion() { 1 } else { -1 };
        }
        tree.grow_tree(leaves.into_iter().map(Node::leaf).collect(), &splitter)
            .unwrap();
    }

    #[test]
    fn test_balanced_chunks() {
        let capacity = NodeCapacity::new(4, 10);
        let sizes: Vec<usize> = balanced_chunks((0..17).collect(), 8, &capacity)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![6, 6, 5]);

        let sizes: Vec<usize> = balanced_chunks((0..9).collect(), 8, &capacity)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![5, 4]);

        assert_eq!(balanced_chunks((0..3).collect(), 8, &capacity).len(), 1);
        assert!(balanced_chunks(Vec::<u8>::new(), 8, &capacity).is_empty());
    }

    #[test]
    fn test_rebuild_empty_tree() {
        let mut tree = update_tree(2, 4);
        let mut tracer = NullObjectTracer;
        let (cleared, stats) = rebuild(&mut tree, 16, &mut tracer).unwrap();
        assert_eq!(cleared, TreeClearIOState::default());
        assert_eq!(stats, RebuildStats::default());
    }

    #[test]
    fn test_rebuild_keeps_only_live_insertions() {
        let mut tree = update_tree(2, 4);
        build(
            &mut tree,
            vec![
                vec![
                    Entry::insertion(item(1, 1.0)),
                    Entry::insertion(item(2, 2.0)),
                    Entry::deletion(item(9, 4.0)),
                ],
                vec![Entry::deletion(item(1, 1.0)), Entry::insertion(item(3, 3.0))],
                vec![Entry::insertion(item(4, 8.0)), Entry::insertion(item(5, 9.0))],
            ],
        );
        let mut tracer = NullObjectTracer;
        // two entries per run: the cancelling pair lands in different runs
        let (cleared, stats) = rebuild(&mut tree, 2, &mut tracer).unwrap();
        assert_eq!(cleared, TreeClearIOState { reads: 4, writes: 4 });
        assert!(stats.runs >= 3);
        assert_eq!(stats.collected_entries, 7);
        assert_eq!(stats.annihilated_in_runs + stats.annihilated_in_merge, 1);
        assert_eq!(stats.dropped_deletions, 1);
        assert_eq!(stats.leaf_nodes_before, 3);
        assert_eq!(stats.index_nodes_before, 1);

        assert_eq!(tree.data_items(), 4);
        assert_eq!(tree.net_items(), 4);
        assert!(check_invariants(&tree).unwrap().is_empty());

        let mut ids = Vec::new();
        tree.visit_nodes(|_, node, _| {
            ids.extend(node.entries().iter().map(|e| e.item.id));
            Ok(())
        })
        .unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_rebuild_fill_factor() {
        let mut tree = update_tree(2, 5);
        let leaves = (0..6u64)
            .map(|i| {
                (0..4u64)
                    .map(|j| Entry::insertion(item(i * 4 + j, (i * 4 + j) as f64)))
                    .collect()
            })
            .collect();
        build(&mut tree, leaves);
        let mut tracer = NullObjectTracer;
        let (_, stats) = rebuild(&mut tree, 64, &mut tracer).unwrap();
        // 24 entries at fill 4 per leaf
        assert_eq!(stats.leaf_nodes_after, 6);
        assert_eq!(stats.index_nodes_after, 3);
        assert_eq!(tree.root_level(), 2);
        assert_eq!(tree.data_items(), 24);
        assert!(check_invariants(&tree).unwrap().is_empty());
    }
}
