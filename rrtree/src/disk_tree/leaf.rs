//! Leaf-level operation semantics of the two tree flavors.

use super::node::Node;
use super::tree::{DiskTree, TreeFlavor};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::{Entry, OperationGroup};

fn leaf_entries(node: &mut Node) -> RRTreeResult<&mut Vec<Entry>> {
    match node {
        Node::Leaf { entries } => Ok(entries),
        Node::Internal { level, .. } => Err(RRTreeError::invariant(format!(
            "leaf operation on a node of level {}",
            level
        ))),
    }
}

fn remove_entry(entries: &mut Vec<Entry>, entry: &Entry) -> bool {
    match entries.iter().position(|e| e == entry) {
        Some(pos) => {
            entries.remove(pos);
            true
        }
        None => false,
    }
}

impl DiskTree {
    fn count_added(&mut self, entry: &Entry) {
        self.data_items += 1;
        self.net_items += if entry.is_insertion() { 1 } else { -1 };
    }

    fn count_removed(&mut self, entry: &Entry) {
        self.data_items = self.data_items.saturating_sub(1);
        self.net_items -= if entry.is_insertion() { 1 } else { -1 };
    }

    /// Applies `ops` to a leaf and returns the operations that took effect.
    ///
    /// On a data tree a deletion of an item the leaf does not hold has no effect and
    /// is not returned. On an update tree every operation takes effect.
    pub fn execute_ops(
        &mut self,
        node: &mut Node,
        ops: &OperationGroup,
        insertion_removes_old_insertion: bool,
    ) -> RRTreeResult<Vec<Entry>> {
        let mut completed = Vec::with_capacity(ops.len());
        for op in ops {
            if self.execute_op(node, op, insertion_removes_old_insertion)? {
                completed.push(*op);
            }
        }
        Ok(completed)
    }

    pub fn execute_op(
        &mut self,
        node: &mut Node,
        op: &Entry,
        insertion_removes_old_insertion: bool,
    ) -> RRTreeResult<bool> {
        let flavor = self.flavor();
        let entries = leaf_entries(node)?;
        match flavor {
            TreeFlavor::Data => {
                if op.is_deletion() {
                    if remove_entry(entries, &op.opposite()) {
                        self.count_removed(&op.opposite());
                        return Ok(true);
                    }
                    Ok(false)
                } else {
                    entries.push(*op);
                    let evicted = if insertion_removes_old_insertion {
                        Some(entries.remove(0))
                    } else {
                        None
                    };
                    self.count_added(op);
                    if let Some(old) = evicted {
                        self.count_removed(&old);
                    }
                    Ok(true)
                }
            }
            TreeFlavor::Update => {
                let opposite = op.opposite();
                // an equal entry stays when its deletion was stored in another leaf
                if remove_entry(entries, &opposite) {
                    self.count_removed(&opposite);
                } else {
                    entries.push(*op);
                    self.count_added(op);
                }
                Ok(true)
            }
        }
    }

    /// Whether `op` may be piggybacked onto `node`.
    ///
    /// `allow_outside` admits operations outside the node rectangle, used when the
    /// rectangle was expanded by a piggybacking epsilon.
    pub fn does_operation_fit(&self, node: &Node, op: &Entry, allow_outside: bool) -> bool {
        match self.flavor() {
            TreeFlavor::Data if op.is_deletion() => node.contains_entry(&op.opposite()),
            _ => {
                allow_outside
                    || node
                        .compute_rect()
                        .is_some_and(|rect| rect.contains(op.rect()))
            }
        }
    }

    /// Whether applying `op` grows the leaf by one entry.
    pub fn will_increase_node_size(&self, node: &Node, op: &Entry) -> bool {
        match self.flavor() {
            TreeFlavor::Data => op.is_insertion(),
            TreeFlavor::Update => !node.contains_entry(&op.opposite()),
        }
    }

    pub fn select_fitting(&self, node: &Node, candidates: &[Entry], allow_outside: bool) -> Vec<Entry> {
        candidates
            .iter()
            .filter(|op| self.does_operation_fit(node, op, allow_outside))
            .copied()
            .collect()
    }

    /// Applies candidates to a leaf while staying within the given numbers of
    /// size-increasing and size-decreasing operations. Returns the applied ones.
    pub fn execute_constrained_subset(
        &mut self,
        node: &mut Node,
        candidates: &[Entry],
        max_increasing: usize,
        max_decreasing: usize,
    ) -> RRTreeResult<Vec<Entry>> {
        let mut inc_left = max_increasing;
        let mut dec_left = max_decreasing;
        let mut executed = Vec::new();
        for op in candidates {
            if inc_left == 0 && dec_left == 0 {
                break;
            }
            let increasing = self.will_increase_node_size(node, op);
            match self.flavor() {
                TreeFlavor::Data => {
                    if op.is_deletion() {
                        if dec_left > 0 && self.execute_op(node, op, false)? {
                            dec_left -= 1;
                            executed.push(*op);
                        }
                    } else if inc_left > 0 && !node.contains_entry(op) {
                        self.execute_op(node, op, false)?;
                        inc_left -= 1;
                        executed.push(*op);
                    }
                }
                TreeFlavor::Update => {
                    if increasing && inc_left > 0 {
                        self.execute_op(node, op, false)?;
                        inc_left -= 1;
                        executed.push(*op);
                    } else if !increasing && dec_left > 0 {
                        self.execute_op(node, op, false)?;
                        dec_left -= 1;
                        executed.push(*op);
                    }
                }
            }
        }
        Ok(executed)
    }

    /// Moves every entry of `source` into `target`, both of the same level.
    ///
    /// On update-tree leaves an incoming entry annihilates an opposite entry
    /// already in `target`.
    pub fn add_entries_from(&mut self, target: &mut Node, source: Node) -> RRTreeResult<()> {
        if target.level() != source.level() {
            return Err(RRTreeError::invariant(format!(
                "merging a node of level {} into a node of level {}",
                source.level(),
                target.level()
            )));
        }
        match (target, source) {
            (Node::Leaf { entries }, Node::Leaf { entries: incoming }) => {
                for entry in incoming {
                    if self.flavor().deletions_like_insertions()
                        && remove_entry(entries, &entry.opposite())
                    {
                        self.count_removed(&entry.opposite());
                        self.count_removed(&entry);
                    } else {
                        entries.push(entry);
                    }
                }
            }
            (Node::Internal { children, .. }, Node::Internal { children: incoming, .. }) => {
                children.extend(incoming);
            }
            _ => unreachable!("levels already checked"),
        }
        Ok(())
    }

    /// Cancels entries of leaf `a` against opposite entries of leaf `b`.
    ///
    /// Returns the entries of `a` that were cancelled; their opposites are gone
    /// from `b`. Only update-tree leaves can hold opposite entries.
    pub fn annihilate_across(&mut self, a: &mut Node, b: &mut Node) -> RRTreeResult<Vec<Entry>> {
        if !self.flavor().deletions_like_insertions() {
            return Ok(Vec::new());
        }
        let left = leaf_entries(a)?;
        let right = leaf_entries(b)?;
        let mut cancelled = Vec::new();
        left.retain(|entry| {
            if remove_entry(right, &entry.opposite()) {
                cancelled.push(*entry);
                false
            } else {
                true
            }
        });
        for entry in &cancelled {
            self.count_removed(entry);
            self.count_removed(&entry.opposite());
        }
        Ok(cancelled)
    }
}
