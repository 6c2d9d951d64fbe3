//! In-memory staging area for pending operations.

use crate::errors::{RRTreeError, RRTreeResult};
use crate::geometry::Rect;
use crate::operation::{Entry, Item, OperationGroup};
use indexmap::IndexSet;

/// Number of pending operations cancelled by an opposite operation, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnihilationCounts {
    /// An insertion cancelled a pending deletion
    pub deletion_then_insertion: u64,
    /// A deletion cancelled a pending insertion
    pub insertion_then_deletion: u64,
}

impl AnnihilationCounts {
    pub fn total(&self) -> u64 {
        self.deletion_then_insertion + self.insertion_then_deletion
    }
}

/// Bounded buffer of pending entries with insert/delete annihilation.
///
/// The buffer never holds two identical entries, and never holds both an
/// insertion and a deletion of the same item when filled through
/// [`insert_with_annihilation`](Self::insert_with_annihilation) and
/// [`remove_with_annihilation`](Self::remove_with_annihilation).
#[derive(Debug, Clone)]
pub struct RRTreeBuffer {
    entries: IndexSet<Entry>,
    max_size: usize,
    annihilations: AnnihilationCounts,
}

impl RRTreeBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexSet::with_capacity(max_size),
            max_size,
            annihilations: AnnihilationCounts::default(),
        }
    }

    pub fn current_size(&self) -> usize {
        self.entries.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// A buffer of size zero is always full.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn annihilations(&self) -> AnnihilationCounts {
        self.annihilations
    }

    // a zero-size buffer still holds the one operation being applied
    fn check_capacity(&self) -> RRTreeResult<()> {
        if self.entries.len() >= self.max_size.max(1) {
            return Err(RRTreeError::BufferOverflow {
                capacity: self.max_size,
            });
        }
        Ok(())
    }

    /// Buffers an insertion of `item`, or cancels a pending deletion of it.
    pub fn insert_with_annihilation(&mut self, item: Item) -> RRTreeResult<()> {
        self.check_capacity()?;
        if self.entries.shift_remove(&Entry::deletion(item)) {
            self.annihilations.deletion_then_insertion += 1;
        } else {
            self.entries.insert(Entry::insertion(item));
        }
        Ok(())
    }

    /// Buffers a deletion of `item`, or cancels a pending insertion of it.
    ///
    /// Returns the item when a pending insertion was cancelled.
    pub fn remove_with_annihilation(&mut self, item: Item) -> RRTreeResult<Option<Item>> {
        self.check_capacity()?;
        if self.entries.shift_remove(&Entry::insertion(item)) {
            self.annihilations.insertion_then_deletion += 1;
            Ok(Some(item))
        } else {
            self.entries.insert(Entry::deletion(item));
            Ok(None)
        }
    }

    /// Adds an entry returned from the disk side.
    pub fn insert_entry(&mut self, entry: Entry) -> RRTreeResult<()> {
        if self.entries.contains(&entry) {
            return Err(RRTreeError::invariant(format!(
                "entry {:?} is already buffered",
                entry
            )));
        }
        self.check_capacity()?;
        self.entries.insert(entry);
        Ok(())
    }

    /// Adds `entry` only if an identical entry is not buffered yet.
    pub fn add_entry_if_not_exists(&mut self, entry: Entry) -> RRTreeResult<bool> {
        if self.entries.contains(&entry) {
            return Ok(false);
        }
        self.check_capacity()?;
        self.entries.insert(entry);
        Ok(true)
    }

    pub fn remove_exact_entry(&mut self, entry: &Entry) -> Option<Entry> {
        self.entries.shift_take(entry)
    }

    /// Discards exactly the entries of `group`.
    ///
    /// Deletions missing from the buffer are tolerated: a fanned-out deletion may
    /// already have been removed through another group.
    pub fn remove_group(&mut self, group: &OperationGroup) {
        for entry in group {
            let removed = self.entries.shift_remove(entry);
            debug_assert!(removed || entry.is_deletion());
        }
    }

    /// Every buffered entry, in buffering order
    pub fn flatten(&self) -> OperationGroup {
        self.entries.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn query_entry(&self, entry: &Entry) -> Option<&Entry> {
        self.entries.get(entry)
    }

    /// Entries of either type whose rectangle overlaps `rect`.
    pub fn query_entry_of_any_type(&self, rect: &Rect) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.rect().overlaps(rect))
            .copied()
            .collect()
    }

    pub fn copy_query_all_ops(&self, rect: &Rect) -> Vec<Entry> {
        self.query_entry_of_any_type(rect)
    }

    pub fn copy_query_insertions(&self, rect: &Rect) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.is_insertion() && e.rect().overlaps(rect))
            .copied()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Rectangle covering every buffered operation
    pub fn rect(&self) -> Option<Rect> {
        Rect::covering(self.entries.iter().map(|e| &e.item.rect))
    }
}
