//! Items, pending operations and operation groups.

use crate::geometry::Rect;
use serde::{Deserialize, Serialize};

/// Stable identity of an item
pub type ItemId = u64;

/// A data object indexed by the tree: an identity plus its bounding rectangle.
///
/// Two items are equal only when both the id and the rectangle match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub rect: Rect,
}

impl Item {
    pub fn new(id: ItemId, rect: Rect) -> Self {
        Self { id, rect }
    }
}

/// Kind of a pending update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Insertion,
    Deletion,
}

impl OperationType {
    pub fn opposite(self) -> Self {
        match self {
            OperationType::Insertion => OperationType::Deletion,
            OperationType::Deletion => OperationType::Insertion,
        }
    }
}

/// An item with an operation type.
///
/// This is the unit stored by the buffer and by update-tree leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub item: Item,
    pub op: OperationType,
}

impl Entry {
    pub fn new(item: Item, op: OperationType) -> Self {
        Self { item, op }
    }

    pub fn insertion(item: Item) -> Self {
        Self::new(item, OperationType::Insertion)
    }

    pub fn deletion(item: Item) -> Self {
        Self::new(item, OperationType::Deletion)
    }

    pub fn is_insertion(&self) -> bool {
        self.op == OperationType::Insertion
    }

    pub fn is_deletion(&self) -> bool {
        self.op == OperationType::Deletion
    }

    /// The entry that annihilates this one
    pub fn opposite(&self) -> Entry {
        Entry::new(self.item, self.op.opposite())
    }

    pub fn rect(&self) -> &Rect {
        &self.item.rect
    }
}

/// A bag of pending operations destined for one subtree.
///
/// Groups are not deduplicated: an insertion and a deletion of the same item
/// may sit in one group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationGroup {
    entries: Vec<Entry>,
}

impl OperationGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.entries.contains(entry)
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Removes one occurrence of `entry`, returning whether it was present.
    pub fn remove(&mut self, entry: &Entry) -> bool {
        match self.entries.iter().position(|e| e == entry) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn retain<F: FnMut(&Entry) -> bool>(&mut self, f: F) {
        self.entries.retain(f);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    pub fn size_in_insertions(&self) -> usize {
        self.entries.iter().filter(|e| e.is_insertion()).count()
    }

    /// Size used by size-based push-down policies: insertions only, or every entry.
    pub fn size_in_significant_ops(&self, by_insertions: bool) -> usize {
        if by_insertions {
            self.size_in_insertions()
        } else {
            self.len()
        }
    }

    pub fn is_insertion_only(&self) -> bool {
        self.entries.iter().all(|e| e.is_insertion())
    }

    /// Rectangle covering every operation in the group
    pub fn rect(&self) -> Option<Rect> {
        Rect::covering(self.entries.iter().map(|e| &e.item.rect))
    }
}

impl From<Vec<Entry>> for OperationGroup {
    fn from(entries: Vec<Entry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<Entry> for OperationGroup {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<Entry> for OperationGroup {
    fn extend<I: IntoIterator<Item = Entry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl IntoIterator for OperationGroup {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a OperationGroup {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
