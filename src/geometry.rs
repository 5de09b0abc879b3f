//! Device-pixel geometry shared by the hierarchy parser, selector matcher,
//! and command executor.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in device pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Center point, integer division (matches device-pixel tap targeting).
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// `true` iff `(px, py)` falls within the rectangle, right/bottom-exclusive.
    pub fn contains_point(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// `true` iff `other` lies wholly inside `self` (inclusive on all edges).
    pub fn contains_rect(&self, other: &Bounds) -> bool {
        other.left() >= self.left()
            && other.top() >= self.top()
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// `true` iff `self`'s center point falls within `other`, inclusive on all edges.
    pub fn center_within(&self, other: &Bounds) -> bool {
        let (cx, cy) = self.center();
        cx >= other.left() && cx <= other.right() && cy >= other.top() && cy <= other.bottom()
    }

    /// Distance of `self.top()` from `anchor_bottom`, used to order `below` matches.
    pub fn dist_below(&self, anchor_bottom: i32) -> i32 {
        self.top() - anchor_bottom
    }

    pub fn dist_above(&self, anchor_top: i32) -> i32 {
        anchor_top - self.bottom()
    }

    pub fn dist_left_of(&self, anchor_left: i32) -> i32 {
        anchor_left - self.right()
    }

    pub fn dist_right_of(&self, anchor_right: i32) -> i32 {
        self.left() - anchor_right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_point_is_right_bottom_exclusive() {
        let b = Bounds::new(10, 10, 20, 20);
        assert!(b.contains_point(10, 10));
        assert!(b.contains_point(29, 29));
        assert!(!b.contains_point(30, 15));
        assert!(!b.contains_point(15, 30));
        assert!(!b.contains_point(9, 15));
    }

    #[test]
    fn center_uses_integer_division() {
        let b = Bounds::new(100, 200, 301, 81);
        assert_eq!(b.center(), (100 + 150, 200 + 40));
    }

    #[test]
    fn contains_rect_inclusive_edges() {
        let outer = Bounds::new(0, 0, 100, 100);
        let inner = Bounds::new(0, 0, 100, 100);
        assert!(outer.contains_rect(&inner));
        let touching_edge = Bounds::new(50, 50, 50, 50);
        assert!(outer.contains_rect(&touching_edge));
        let overflowing = Bounds::new(50, 50, 60, 10);
        assert!(!outer.contains_rect(&overflowing));
    }
}
