//! Entry sets in which opposite entries of the same item cancel out.

use indexmap::IndexMap;

use crate::operation::{Entry, ItemId};
use crate::tracer::{ObjectTracer, TraceOperation};

/// Entries grouped by item id, in first-seen order.
///
/// Adding an entry whose opposite is present removes both.
#[derive(Debug, Default, Clone)]
pub struct EntryCollection {
    entries: IndexMap<ItemId, Vec<Entry>>,
    len: usize,
    annihilations: u64,
}

impl EntryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry`, returning true when it annihilated a present opposite.
    pub fn add(&mut self, entry: Entry, tracer: &mut dyn ObjectTracer) -> bool {
        let list = self.entries.entry(entry.item.id).or_default();
        let opposite = entry.opposite();
        if let Some(pos) = list.iter().position(|e| *e == opposite) {
            list.swap_remove(pos);
            if list.is_empty() {
                self.entries.shift_remove(&entry.item.id);
            }
            self.len -= 1;
            self.annihilations += 1;
            tracer.trace_update_tree_entry(&entry, TraceOperation::EntryCollectionAddAnnihilate);
            true
        } else {
            list.push(entry);
            self.len += 1;
            tracer.trace_update_tree_entry(&entry, TraceOperation::EntryCollectionAdd);
            false
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn annihilations(&self) -> u64 {
        self.annihilations
    }

    /// Entries left for each item id
    pub fn by_item(&self) -> impl Iterator<Item = (&ItemId, &Vec<Entry>)> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries.into_values().flatten().collect()
    }
}
