//! Routing of pending operations to the children of an index node.

use crate::disk_tree::Node;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::group_map::{GroupKey, IndexEntryOpGroupMap};
use crate::operation::{Entry, OperationGroup};
use crate::stats::StatisticalData;

/// Grouping policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMakerKind {
    /// Insertions by choose-subtree; deletions fanned out to every child
    /// whose rectangle contains them
    Trivial,
    /// Insertions and deletions alike by choose-subtree
    DeletionsAsInsertions,
    /// Every entry is a leaf record routed by choose-subtree. Only valid for
    /// update trees, where a deletion is stored as a tombstone.
    InsertionsOnly,
}

impl GroupMakerKind {
    /// Parses a policy name as used on configuration surfaces
    pub fn from_name(name: &str) -> RRTreeResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trivial" => Ok(GroupMakerKind::Trivial),
            "delsasins" | "deletions-as-insertions" => Ok(GroupMakerKind::DeletionsAsInsertions),
            "insonly" | "insertions-only" => Ok(GroupMakerKind::InsertionsOnly),
            other => Err(RRTreeError::Configuration(format!(
                "unknown operation group maker '{}'",
                other
            ))),
        }
    }
}

/// Builds the [`IndexEntryOpGroupMap`] of an index node for a set of operations.
#[derive(Debug, Clone)]
pub struct OperationGroupMaker {
    kind: GroupMakerKind,
    /// Number of children each deletion was routed to
    deletion_splits: StatisticalData,
}

impl OperationGroupMaker {
    pub fn new(kind: GroupMakerKind) -> Self {
        Self {
            kind,
            deletion_splits: StatisticalData::new(),
        }
    }

    pub fn kind(&self) -> GroupMakerKind {
        self.kind
    }

    pub fn deletion_splits(&self) -> &StatisticalData {
        &self.deletion_splits
    }

    pub fn reset_statistics(&mut self) {
        self.deletion_splits.clear();
    }

    pub fn make_groups(
        &mut self,
        node: &Node,
        ops: &OperationGroup,
    ) -> RRTreeResult<IndexEntryOpGroupMap> {
        self.make_groups_as(self.kind, node, ops)
    }

    /// Groups with an explicit policy, used when an emptying overrides the
    /// configured one.
    pub fn make_groups_as(
        &mut self,
        kind: GroupMakerKind,
        node: &Node,
        ops: &OperationGroup,
    ) -> RRTreeResult<IndexEntryOpGroupMap> {
        if node.is_leaf() {
            return Err(RRTreeError::IllegalArgument(
                "operations can only be grouped at an index node".into(),
            ));
        }
        let mut groups = IndexEntryOpGroupMap::new();
        for op in ops {
            match (kind, op.is_deletion()) {
                (GroupMakerKind::Trivial, true) => self.fan_out_deletion(node, op, &mut groups),
                _ => route_by_choose_subtree(node, op, &mut groups),
            }
        }
        Ok(groups)
    }

    fn fan_out_deletion(&mut self, node: &Node, op: &Entry, groups: &mut IndexEntryOpGroupMap) {
        let mut splits = 0;
        for child in node.children() {
            if child.rect.contains(op.rect()) {
                groups.add_entry(GroupKey::Child(child.id), *op);
                splits += 1;
            }
        }
        if splits == 0 {
            groups.add_entry(GroupKey::Orphan, *op);
        }
        self.deletion_splits.update(splits, 1);
    }
}

fn route_by_choose_subtree(node: &Node, op: &Entry, groups: &mut IndexEntryOpGroupMap) {
    match node.choose_subtree(op.rect()) {
        Some(child) => groups.add_entry(GroupKey::Child(child.id), *op),
        None => groups.add_entry(GroupKey::Orphan, *op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_tree::ChildRef;
    use crate::geometry::Rect;
    use crate::operation::Item;

    fn node(rects: &[Rect]) -> Node {
        Node::internal(
            1,
            rects
                .iter()
                .enumerate()
                .map(|(i, r)| ChildRef {
                    rect: *r,
                    id: i as u64 + 1,
                })
                .collect(),
        )
    }

    fn ins(id: u64, r: Rect) -> Entry {
        Entry::insertion(Item::new(id, r))
    }

    fn del(id: u64, r: Rect) -> Entry {
        Entry::deletion(Item::new(id, r))
    }

    fn rect(a: f64, b: f64, c: f64, d: f64) -> Rect {
        Rect::new(a, b, c, d)
    }

    #[test]
    fn test_grouping_at_leaf_is_rejected() {
        let mut maker = OperationGroupMaker::new(GroupMakerKind::Trivial);
        let err = maker
            .make_groups(&Node::empty_leaf(), &OperationGroup::new())
            .unwrap_err();
        assert!(matches!(err, RRTreeError::IllegalArgument(_)));
    }

    #[test]
    fn test_insertion_outside_goes_to_single_child() {
        let mut maker = OperationGroupMaker::new(GroupMakerKind::Trivial);
        let n = node(&[rect(2.0, 2.0, 3.0, 3.0), rect(4.0, 4.0, 4.0, 4.0)]);
        let op = ins(1, rect(0.0, 0.0, 1.0, 1.0));
        let groups = maker.make_groups(&n, &vec![op].into()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.total_ops(), 1);
        assert!(groups.get(&GroupKey::Orphan).is_none());
    }

    #[test]
    fn test_split_deletion() {
        let mut maker = OperationGroupMaker::new(GroupMakerKind::Trivial);
        let n = node(&[rect(0.0, 0.0, 4.0, 4.0), rect(3.0, 3.0, 5.0, 5.0)]);
        let op = del(1, rect(3.0, 3.0, 4.0, 4.0));
        let groups = maker.make_groups(&n, &vec![op].into()).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.get(&GroupKey::Child(1)).unwrap().contains(&op));
        assert!(groups.get(&GroupKey::Child(2)).unwrap().contains(&op));
        assert_eq!(groups.flatten().len(), 1);

        maker.make_groups(&n, &vec![op].into()).unwrap();
        assert_eq!(maker.deletion_splits().len(), 1);
        assert_eq!(maker.deletion_splits().get(2), 2);
        maker.reset_statistics();
        assert!(maker.deletion_splits().is_empty());
    }

    #[test]
    fn test_deletion_contained_nowhere_is_orphaned() {
        let mut maker = OperationGroupMaker::new(GroupMakerKind::Trivial);
        let n = node(&[rect(0.0, 0.0, 2.0, 2.0), rect(2.0, 2.0, 4.0, 4.0)]);
        let op = del(1, rect(1.0, 1.0, 3.0, 3.0));
        let groups = maker.make_groups(&n, &vec![op].into()).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups.get(&GroupKey::Orphan).unwrap().contains(&op));
        assert_eq!(maker.deletion_splits().get(0), 1);
    }

    #[test]
    fn test_mixed_operations() {
        let mut maker = OperationGroupMaker::new(GroupMakerKind::Trivial);
        let n = node(&[
            rect(0.0, 0.0, 1.1, 1.1),
            rect(2.0, 2.0, 6.0, 6.0),
            rect(5.0, 5.0, 7.0, 7.0),
            rect(4.0, 5.0, 6.0, 7.0),
        ]);
        let ops: OperationGroup = vec![
            ins(1, rect(0.0, 0.0, 1.0, 1.0)),
            ins(2, rect(1.5, 1.5, 2.0, 2.0)),
            del(3, rect(0.0, 10.0, 1.0, 11.0)),
            del(4, rect(2.0, 2.0, 3.0, 3.0)),
            del(5, rect(5.0, 5.0, 6.0, 6.0)),
        ]
        .into();
        let groups = maker.make_groups(&n, &ops).unwrap();
        // Item 5 goes to three children, everything else to one group
        assert_eq!(groups.total_ops(), 7);
        assert!(groups
            .get(&GroupKey::Orphan)
            .unwrap()
            .contains(&del(3, rect(0.0, 10.0, 1.0, 11.0))));
        assert_eq!(maker.deletion_splits().get(3), 1);
        assert_eq!(groups.flatten().len(), 5);
    }

    #[test]
    fn test_deletions_as_insertions_routes_once() {
        let mut maker = OperationGroupMaker::new(GroupMakerKind::DeletionsAsInsertions);
        let n = node(&[rect(0.0, 0.0, 4.0, 4.0), rect(3.0, 3.0, 5.0, 5.0)]);
        let op = del(1, rect(3.0, 3.0, 4.0, 4.0));
        let groups = maker.make_groups(&n, &vec![op].into()).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(maker.deletion_splits().is_empty());
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(
            GroupMakerKind::from_name("INSONLY").unwrap(),
            GroupMakerKind::InsertionsOnly
        );
        assert_eq!(
            GroupMakerKind::from_name("trivial").unwrap(),
            GroupMakerKind::Trivial
        );
        assert!(GroupMakerKind::from_name("bogus").is_err());
    }
}
