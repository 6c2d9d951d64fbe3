//! Bounding rectangles used as descriptors for items, nodes and queries.

use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// A 2D axis-aligned rectangle given by its minimum and maximum corners.
///
/// Rectangles are closed: two rectangles sharing only an edge overlap.
///
/// # Examples
///
/// ```rust
/// use rrtree::Rect;
///
/// let leaf = Rect::new(0.0, 0.0, 10.0, 10.0);
/// let item = Rect::new(2.0, 2.0, 3.0, 3.0);
/// assert!(leaf.contains(&item));
/// assert!(leaf.overlaps(&Rect::new(9.0, 9.0, 20.0, 20.0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Eq for Rect {}

impl Hash for Rect {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.min_x.to_bits().hash(state);
        self.min_y.to_bits().hash(state);
        self.max_x.to_bits().hash(state);
        self.max_y.to_bits().hash(state);
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rect({}, {}, {}, {})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl Rect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// A degenerate rectangle covering a single point
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    pub fn contains(&self, other: &Rect) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    pub fn area(&self) -> f64 {
        (self.max_x - self.min_x) * (self.max_y - self.min_y)
    }

    /// Area increase needed for this rectangle to cover `other`
    pub fn enlargement(&self, other: &Rect) -> f64 {
        self.union(other).area() - self.area()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn expand(&mut self, other: &Rect) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Scales the side lengths by `1 + epsilon` around the center.
    pub fn expanded_by(&self, epsilon: f64) -> Rect {
        let (cx, cy) = self.center();
        let half_w = (self.max_x - self.min_x) * (1.0 + epsilon) / 2.0;
        let half_h = (self.max_y - self.min_y) * (1.0 + epsilon) / 2.0;
        Rect::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    /// Smallest rectangle covering all of `rects`, `None` for an empty input.
    pub fn covering<'a, I>(rects: I) -> Option<Rect>
    where
        I: IntoIterator<Item = &'a Rect>,
    {
        let mut iter = rects.into_iter();
        let mut result = *iter.next()?;
        for rect in iter {
            result.expand(rect);
        }
        Some(result)
    }
}
