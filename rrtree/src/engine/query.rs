//! Range queries over disk tree and buffer.

use indexmap::IndexSet;
use log::{debug, warn};

use super::RRTree;
use crate::disk_tree::TreeFlavor;
use crate::entry_collection::EntryCollection;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::geometry::Rect;
use crate::operation::{Entry, Item};
use crate::piggyback::{LeafNodePiggybacker, PiggybackKind};
use crate::tracer::TraceOperation;

/// Pull-based cursor over the results of a query
#[derive(Debug)]
pub struct QueryCursor {
    items: std::vec::IntoIter<Item>,
}

impl QueryCursor {
    pub(crate) fn new(items: Vec<Item>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for QueryCursor {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for QueryCursor {}

impl RRTree {
    pub(super) fn run_query(&mut self, rect: &Rect) -> RRTreeResult<QueryCursor> {
        let disk = self.query_disk(rect)?;
        let buffered = self.buffer.query_entry_of_any_type(rect);
        let items = match self.config.flavor {
            TreeFlavor::Data => self.combine_data_tree_results(disk, buffered),
            TreeFlavor::Update => self.combine_update_tree_results(disk, buffered)?,
        };
        Ok(QueryCursor::new(items))
    }

    /// Leaf entries overlapping `rect`, piggybacking buffered operations onto
    /// the visited leaves when enabled.
    fn query_disk(&mut self, rect: &Rect) -> RRTreeResult<Vec<Entry>> {
        let leaf_ids = self.tree.fetch_intersecting_leaf_ids(rect)?;
        let mut piggybacker = LeafNodePiggybacker::new();
        let mut result = Vec::new();
        for id in leaf_ids {
            let mut leaf = self.tree.load_node(id)?;
            if self.config.enable_query_piggybacking
                && piggybacker.modify(
                    &mut self.tree,
                    &mut leaf,
                    &self.buffer,
                    false,
                    0.0,
                    &mut self.stats,
                    self.tracer.as_mut(),
                )?
            {
                self.tree.container_mut().update(id, &leaf)?;
            }
            result.extend(leaf.entries().iter().filter(|e| e.rect().overlaps(rect)));
        }
        piggybacker.finalize(
            &mut self.buffer,
            PiggybackKind::Query,
            &mut self.stats,
            self.tracer.as_mut(),
        );
        Ok(result)
    }

    /// Whether a leaf stores the insertion of `item`, without piggybacking.
    pub(super) fn disk_holds(&self, item: &Item) -> RRTreeResult<bool> {
        let entry = Entry::insertion(*item);
        for id in self.tree.fetch_intersecting_leaf_ids(&item.rect)? {
            if self.tree.load_node(id)?.contains_entry(&entry) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn combine_data_tree_results(&mut self, disk: Vec<Entry>, buffered: Vec<Entry>) -> Vec<Item> {
        let mut items: IndexSet<Item> = IndexSet::with_capacity(disk.len() + buffered.len());
        for entry in disk {
            self.tracer
                .trace_object(&entry.item, TraceOperation::DataTreeQueryDiskResult);
            items.insert(entry.item);
        }
        for entry in buffered {
            self.tracer
                .trace_update_tree_entry(&entry, TraceOperation::DataTreeQueryBufferResult);
            if entry.is_insertion() {
                items.insert(entry.item);
            } else if !items.shift_remove(&entry.item) {
                debug!(
                    "buffered deletion of item {} matches no query result",
                    entry.item.id
                );
            }
        }
        for item in &items {
            self.tracer
                .trace_object(item, TraceOperation::DataTreeQueryFinalResult);
        }
        items.into_iter().collect()
    }

    fn combine_update_tree_results(
        &mut self,
        disk: Vec<Entry>,
        buffered: Vec<Entry>,
    ) -> RRTreeResult<Vec<Item>> {
        let mut collection = EntryCollection::new();
        for entry in disk {
            self.tracer
                .trace_update_tree_entry(&entry, TraceOperation::UpdateTreeQueryDiskResult);
            collection.add(entry, self.tracer.as_mut());
        }
        for entry in buffered {
            self.tracer
                .trace_update_tree_entry(&entry, TraceOperation::UpdateTreeQueryBufferResult);
            collection.add(entry, self.tracer.as_mut());
        }

        let mut items = Vec::with_capacity(collection.len());
        for (id, entries) in collection.by_item() {
            match entries.as_slice() {
                [entry] if entry.is_insertion() => items.push(entry.item),
                [entry] => warn!(
                    "deletion of item {} at {} matches no query result",
                    id, entry.item.rect
                ),
                [] => {}
                _ => {
                    return Err(RRTreeError::invariant(format!(
                        "Unannihilated query results for item {}: {:?}",
                        id, entries
                    )))
                }
            }
        }
        Ok(items)
    }
}
