//! Recursive two-way node splitting.

use super::node::{HasRect, Node, NodeCapacity};

/// Splits an overflowing node into nodes within capacity by recursive bisection.
///
/// Each bisection sorts the entries by rectangle center along the axis where the
/// centers are spread the widest and cuts the sorted sequence in half. Halves
/// that still overflow are bisected again. With `2 * min <= max` every half of an
/// overflowing node holds at least `min` entries.
#[derive(Debug, Clone, Copy)]
pub struct RecursiveTwoWaySplitter {
    capacity: NodeCapacity,
}

impl RecursiveTwoWaySplitter {
    pub fn new(capacity: NodeCapacity) -> Self {
        Self { capacity }
    }

    /// Splits `node` into nodes of the same level.
    ///
    /// A node within capacity, including an empty or underflowing one, is
    /// returned unchanged as the only result.
    pub fn split(&self, node: Node) -> Vec<Node> {
        if !node.overflows(&self.capacity) {
            return vec![node];
        }
        match node {
            Node::Leaf { entries } => self
                .bisect(entries)
                .into_iter()
                .map(Node::leaf)
                .collect(),
            Node::Internal { children, level } => self
                .bisect(children)
                .into_iter()
                .map(|children| Node::internal(level, children))
                .collect(),
        }
    }

    fn bisect<T: HasRect>(&self, mut items: Vec<T>) -> Vec<Vec<T>> {
        if !self.capacity.overflows(items.len()) {
            return vec![items];
        }
        let by_x = spread(&items, |x, _| x);
        let by_y = spread(&items, |_, y| y);
        let use_x = by_x >= by_y;
        items.sort_by(|a, b| {
            let (ax, ay) = a.rect().center();
            let (bx, by) = b.rect().center();
            let (ka, kb) = if use_x { (ax, bx) } else { (ay, by) };
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });
        let upper = items.split_off(items.len() / 2);
        let mut result = self.bisect(items);
        result.extend(self.bisect(upper));
        result
    }
}

fn spread<T: HasRect>(items: &[T], axis: impl Fn(f64, f64) -> f64) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for item in items {
        let (x, y) = item.rect().center();
        let v = axis(x, y);
        min = min.min(v);
        max = max.max(v);
    }
    max - min
}
