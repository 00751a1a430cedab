//! Screen geometry primitives
//!
//! Edge-based, inclusive rectangles shared by the component extractor, the
//! auto-block detector and the platform capture interface.

use serde::{Deserialize, Serialize};

/// A pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Inclusive rectangle: `left..=right` by `top..=bottom`.
///
/// Always non-degenerate; the fallible constructors refuse anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl Rectangle {
    /// Build from inclusive edges
    pub fn from_edges(left: u32, top: u32, right: u32, bottom: u32) -> Option<Self> {
        if left > right || top > bottom {
            return None;
        }
        Some(Self { left, top, right, bottom })
    }

    /// Build from origin and size
    pub fn from_xywh(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let right = x.checked_add(width - 1)?;
        let bottom = y.checked_add(height - 1)?;
        Some(Self { left: x, top: y, right, bottom })
    }

    /// Build from signed edges, clamping to `0..width` / `0..height`
    pub fn clamped(left: i64, top: i64, right: i64, bottom: i64, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = width as i64 - 1;
        let max_y = height as i64 - 1;
        let l = left.clamp(0, max_x);
        let t = top.clamp(0, max_y);
        let r = right.clamp(0, max_x);
        let b = bottom.clamp(0, max_y);
        Self::from_edges(l as u32, t as u32, r as u32, b as u32)
    }

    pub fn left(&self) -> u32 {
        self.left
    }

    pub fn top(&self) -> u32 {
        self.top
    }

    pub fn right(&self) -> u32 {
        self.right
    }

    pub fn bottom(&self) -> u32 {
        self.bottom
    }

    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Width divided by height
    pub fn aspect_ratio(&self) -> f64 {
        self.width() as f64 / self.height() as f64
    }

    /// Center in (possibly fractional) pixel coordinates
    pub fn center(&self) -> (f64, f64) {
        (
            (self.left as f64 + self.right as f64) / 2.0,
            (self.top as f64 + self.bottom as f64) / 2.0,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    /// Distance from a point to the nearest pixel of this rectangle (0 when inside)
    pub fn distance_to(&self, point: Point) -> f64 {
        let dx = if point.x < self.left {
            (self.left - point.x) as f64
        } else if point.x > self.right {
            (point.x - self.right) as f64
        } else {
            0.0
        };
        let dy = if point.y < self.top {
            (self.top - point.y) as f64
        } else if point.y > self.bottom {
            (point.y - self.bottom) as f64
        } else {
            0.0
        };
        (dx * dx + dy * dy).sqrt()
    }

    /// Grow every edge outward by `margin`, clamped to an image of the given size
    pub fn expanded(&self, margin: u32, width: u32, height: u32) -> Option<Self> {
        let m = margin as i64;
        Self::clamped(
            self.left as i64 - m,
            self.top as i64 - m,
            self.right as i64 + m,
            self.bottom as i64 + m,
            width,
            height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_rectangles_rejected() {
        assert!(Rectangle::from_edges(5, 0, 4, 0).is_none());
        assert!(Rectangle::from_xywh(0, 0, 0, 3).is_none());
        assert!(Rectangle::from_edges(3, 3, 3, 3).is_some());
    }

    #[test]
    fn test_derived_quantities() {
        let rect = Rectangle::from_xywh(10, 20, 30, 10).unwrap();
        assert_eq!(rect.right(), 39);
        assert_eq!(rect.bottom(), 29);
        assert_eq!(rect.area(), 300);
        assert!((rect.aspect_ratio() - 3.0).abs() < f64::EPSILON);
        assert_eq!(rect.center(), (24.5, 24.5));
    }

    #[test]
    fn test_distance_and_contains() {
        let rect = Rectangle::from_edges(10, 10, 20, 20).unwrap();
        assert!(rect.contains(Point::new(15, 10)));
        assert_eq!(rect.distance_to(Point::new(15, 15)), 0.0);
        assert_eq!(rect.distance_to(Point::new(25, 15)), 5.0);
        assert_eq!(rect.distance_to(Point::new(23, 24)), 5.0);
    }

    #[test]
    fn test_expanded_clamps_to_image() {
        let rect = Rectangle::from_edges(2, 2, 8, 8).unwrap();
        let grown = rect.expanded(5, 10, 12).unwrap();
        assert_eq!((grown.left(), grown.top(), grown.right(), grown.bottom()), (0, 0, 9, 11));
    }
}
