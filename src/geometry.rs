//! Axis-aligned bounds and per-kind bounding-box computation.

#[cfg(test)]
#[path = "geometry_test.rs"]
mod geometry_test;

use crate::consts::MIN_POINT_EXTENT;
use crate::model::{BoardObject, Geometry};

/// Axis-aligned rectangle in world coordinates. `left <= right`, `top <= bottom`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Bounds {
    #[must_use]
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left: left.min(right), top: top.min(bottom), right: left.max(right), bottom: top.max(bottom) }
    }

    /// Rectangle from an origin and a size.
    #[must_use]
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Closed-interval overlap: touching edges count.
    #[must_use]
    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.right >= other.left && self.left <= other.right && self.bottom >= other.top && self.top <= other.bottom
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.top.is_finite() && self.right.is_finite() && self.bottom.is_finite()
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Grow symmetrically so each axis spans at least `min`.
    #[must_use]
    pub fn with_min_extent(self, min: f64) -> Self {
        let (left, right) = expand_axis(self.left, self.right, min);
        let (top, bottom) = expand_axis(self.top, self.bottom, min);
        Self { left, top, right, bottom }
    }
}

fn expand_axis(lo: f64, hi: f64, min: f64) -> (f64, f64) {
    if hi - lo >= min {
        return (lo, hi);
    }
    let mid = (lo + hi) / 2.0;
    (mid - min / 2.0, mid + min / 2.0)
}

/// World-space bounding box of an object, ignoring rotation.
///
/// Point-list kinds are padded to [`MIN_POINT_EXTENT`] so a zero-length line
/// still intersects queries.
#[must_use]
pub fn object_bounds(obj: &BoardObject) -> Bounds {
    match &obj.geometry {
        Geometry::StickyNote { width, height }
        | Geometry::Rectangle { width, height }
        | Geometry::Circle { width, height }
        | Geometry::Text { width, height }
        | Geometry::Frame { width, height } => Bounds::from_rect(obj.x, obj.y, *width, *height),
        Geometry::Line { points } | Geometry::Connector { points, .. } => point_bounds(obj.x, obj.y, points),
    }
}

fn point_bounds(x: f64, y: f64, points: &[f64]) -> Bounds {
    let mut pairs = points.chunks_exact(2);
    let Some(first) = pairs.next() else {
        return Bounds::new(x, y, x, y).with_min_extent(MIN_POINT_EXTENT);
    };
    let mut b = Bounds { left: first[0], top: first[1], right: first[0], bottom: first[1] };
    for p in pairs {
        b.left = b.left.min(p[0]);
        b.right = b.right.max(p[0]);
        b.top = b.top.min(p[1]);
        b.bottom = b.bottom.max(p[1]);
    }
    Bounds { left: b.left + x, top: b.top + y, right: b.right + x, bottom: b.bottom + y }.with_min_extent(MIN_POINT_EXTENT)
}
