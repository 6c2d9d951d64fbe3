//! Hilbert curve keys for ordering rectangles during garbage collection.
//!
//! Rectangles are keyed by the position of their center on a Hilbert curve
//! laid over a bounding rectangle. Rectangles that sort close together are
//! spatially close, which keeps the set of leaves a GC pass touches at once
//! small.

use std::cmp::Ordering;

use crate::geometry::Rect;

/// Curve position of a grid cell `(x, y)` on a `side * side` grid.
///
/// `side` must be a power of two.
fn cell_distance(side: u64, mut x: u64, mut y: u64) -> u64 {
    let mut distance = 0u64;
    let mut step = side >> 1;
    while step > 0 {
        let rx = u64::from(x & step != 0);
        let ry = u64::from(y & step != 0);
        distance += step * step * ((3 * rx) ^ ry);
        // rotate the quadrant so the curve stays continuous
        if ry == 0 {
            if rx == 1 {
                x = side - 1 - x;
                y = side - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        step >>= 1;
    }
    distance
}

fn normalize(value: f64, low: f64, high: f64) -> f64 {
    let range = high - low;
    if range > 0.0 {
        ((value - low) / range).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Hilbert key of the center of `rect` within `bounds`.
///
/// Centers outside `bounds` are clamped to its border.
pub fn hilbert_key(rect: &Rect, bounds: &Rect, order: u32) -> u64 {
    debug_assert!(order > 0 && order <= 32, "hilbert order must be 1-32");
    let side = 1u64 << order;
    let (cx, cy) = rect.center();
    let scale = (side - 1) as f64;
    let x = (normalize(cx, bounds.min_x, bounds.max_x) * scale).round() as u64;
    let y = (normalize(cy, bounds.min_y, bounds.max_y) * scale).round() as u64;
    cell_distance(side, x.min(side - 1), y.min(side - 1))
}

/// Orders rectangles by the Hilbert key of their centers
#[derive(Debug, Clone, Copy)]
pub struct HilbertComparator {
    bounds: Rect,
    order: u32,
}

impl HilbertComparator {
    pub fn new(bounds: Rect, order: u32) -> Self {
        Self { bounds, order }
    }

    pub fn key(&self, rect: &Rect) -> u64 {
        hilbert_key(rect, &self.bounds, self.order)
    }

    pub fn compare(&self, a: &Rect, b: &Rect) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }
}
