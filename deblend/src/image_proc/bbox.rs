//! Axis-aligned pixel boxes.
//!
//! Boxes carry a signed origin so that model boxes may hang over the frame
//! border; [`BBox::clip`] intersects them with an image extent.

use serde::{Deserialize, Serialize};

/// Box with origin (`y0` row, `x0` column) and extent (`height`, `width`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub y0: isize,
    pub x0: isize,
    pub height: usize,
    pub width: usize,
}

impl BBox {
    pub fn new(y0: isize, x0: isize, height: usize, width: usize) -> Self {
        Self {
            y0,
            x0,
            height,
            width,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    /// Spatial shape (height, width)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn y1(&self) -> isize {
        self.y0 + self.height as isize
    }

    pub fn x1(&self) -> isize {
        self.x0 + self.width as isize
    }

    pub fn contains(&self, row: isize, col: isize) -> bool {
        row >= self.y0 && row < self.y1() && col >= self.x0 && col < self.x1()
    }

    /// Grow the box to cover pixel (`row`, `col`).
    pub fn expand_to_include(&mut self, row: usize, col: usize) {
        let (row, col) = (row as isize, col as isize);
        if self.is_empty() {
            *self = Self::new(row, col, 1, 1);
            return;
        }
        let y0 = self.y0.min(row);
        let x0 = self.x0.min(col);
        let y1 = self.y1().max(row + 1);
        let x1 = self.x1().max(col + 1);
        *self = Self::new(y0, x0, (y1 - y0) as usize, (x1 - x0) as usize);
    }

    /// Intersection with the image extent `(0, 0)..(height, width)`.
    pub fn clip(&self, shape: (usize, usize)) -> Self {
        let y0 = self.y0.clamp(0, shape.0 as isize);
        let x0 = self.x0.clamp(0, shape.1 as isize);
        let y1 = self.y1().clamp(0, shape.0 as isize);
        let x1 = self.x1().clamp(0, shape.1 as isize);
        Self::new(y0, x0, (y1 - y0).max(0) as usize, (x1 - x0).max(0) as usize)
    }
}

impl Default for BBox {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_from_empty() {
        let mut bbox = BBox::default();
        assert!(bbox.is_empty());
        bbox.expand_to_include(4, 7);
        assert_eq!(bbox, BBox::new(4, 7, 1, 1));
        bbox.expand_to_include(2, 9);
        assert_eq!(bbox, BBox::new(2, 7, 3, 3));
    }

    #[test]
    fn test_clip_overhanging_box() {
        let bbox = BBox::new(-1, -1, 5, 5);
        assert_eq!(bbox.clip((10, 10)), BBox::new(0, 0, 4, 4));
        assert!(BBox::new(20, 20, 3, 3).clip((10, 10)).is_empty());
    }

    #[test]
    fn test_contains_half_open() {
        let bbox = BBox::new(2, 3, 3, 6);
        assert_eq!(bbox.shape(), (3, 6));
        assert!(bbox.contains(4, 8));
        assert!(!bbox.contains(5, 8));
        assert!(!bbox.contains(2, 9));
    }
}
