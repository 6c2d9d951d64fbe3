//! Mapping from child index entries to the operation groups routed to them.

use crate::container::NodeId;
use crate::operation::{Entry, OperationGroup};
use indexmap::{IndexMap, IndexSet};

/// Destination of an operation group.
///
/// `Orphan` collects operations that cannot descend into any child (for example, a
/// deletion whose rectangle is not contained in any child rectangle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Child(NodeId),
    Orphan,
}

/// Operation groups keyed by the child they are routed to.
///
/// Iteration follows insertion order so a push-down decision is deterministic
/// for a given tree state and buffer content.
#[derive(Debug, Clone, Default)]
pub struct IndexEntryOpGroupMap {
    groups: IndexMap<GroupKey, OperationGroup>,
}

impl IndexEntryOpGroupMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, key: GroupKey, entry: Entry) {
        self.groups.entry(key).or_default().push(entry);
    }

    /// Adds `entry` unless the group for `key` already holds it.
    pub fn add_entry_if_not_exists(&mut self, key: GroupKey, entry: Entry) -> bool {
        let group = self.groups.entry(key).or_default();
        if group.contains(&entry) {
            false
        } else {
            group.push(entry);
            true
        }
    }

    pub fn get(&self, key: &GroupKey) -> Option<&OperationGroup> {
        self.groups.get(key)
    }

    pub fn get_mut(&mut self, key: &GroupKey) -> Option<&mut OperationGroup> {
        self.groups.get_mut(key)
    }

    pub fn put(&mut self, key: GroupKey, group: OperationGroup) {
        self.groups.insert(key, group);
    }

    pub fn remove(&mut self, key: &GroupKey) -> Option<OperationGroup> {
        self.groups.shift_remove(key)
    }

    /// Moves the group under `key` from `other` into this map.
    pub fn move_group_from(&mut self, other: &mut IndexEntryOpGroupMap, key: GroupKey) {
        if let Some(group) = other.remove(&key) {
            self.groups.insert(key, group);
        }
    }

    /// Replaces the content of this map with a single mapping.
    pub fn clear_and_set(&mut self, key: GroupKey, group: OperationGroup) {
        self.groups.clear();
        self.groups.insert(key, group);
    }

    /// Copies every mapping of `other` into this map.
    pub fn put_all(&mut self, other: &IndexEntryOpGroupMap) {
        for (key, group) in other.iter() {
            self.groups.insert(*key, group.clone());
        }
    }

    /// Removes and returns the first mapping in iteration order.
    pub fn pop_first(&mut self) -> Option<(GroupKey, OperationGroup)> {
        self.groups.shift_remove_index(0)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, GroupKey, OperationGroup> {
        self.groups.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.groups.keys()
    }

    /// Total number of operations across groups, counting fanned-out deletions once per group.
    pub fn total_ops(&self) -> usize {
        self.groups.values().map(|g| g.len()).sum()
    }

    /// All operations of every group.
    ///
    /// A deletion routed to several children appears once in the result.
    pub fn flatten(&self) -> OperationGroup {
        let mut seen: IndexSet<Entry> = IndexSet::with_capacity(self.total_ops());
        for group in self.groups.values() {
            for entry in group {
                seen.insert(*entry);
            }
        }
        seen.into_iter().collect()
    }

    /// Only the insertions of every group.
    pub fn flatten_only_insertions(&self) -> OperationGroup {
        let mut seen: IndexSet<Entry> = IndexSet::new();
        for group in self.groups.values() {
            for entry in group.iter().filter(|e| e.is_insertion()) {
                seen.insert(*entry);
            }
        }
        seen.into_iter().collect()
    }

    pub fn num_of_distinct_ops(&self) -> usize {
        self.flatten().len()
    }
}

impl IntoIterator for IndexEntryOpGroupMap {
    type Item = (GroupKey, OperationGroup);
    type IntoIter = indexmap::map::IntoIter<GroupKey, OperationGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a> IntoIterator for &'a IndexEntryOpGroupMap {
    type Item = (&'a GroupKey, &'a OperationGroup);
    type IntoIter = indexmap::map::Iter<'a, GroupKey, OperationGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}
