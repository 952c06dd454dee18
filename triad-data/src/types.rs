//! Core data types for point clouds and spatial bounds.
//!
//! These are CPU-side representations shared by dataset loading and
//! training-side scene management.

use glam::Vec3;

/// A colored point in 3D space with an optional surface normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Position in world space.
    pub position: Vec3,
    /// RGB color (linear, 0-1 range).
    pub color: Vec3,
    /// Surface normal, zero when the source carried none.
    pub normal: Vec3,
}

impl Point {
    /// Create a new point with position and color.
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position,
            color,
            normal: Vec3::ZERO,
        }
    }

    pub fn with_normal(position: Vec3, color: Vec3, normal: Vec3) -> Self {
        Self {
            position,
            color,
            normal,
        }
    }
}

impl Default for Point {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::splat(0.8),
            normal: Vec3::ZERO,
        }
    }
}

/// The initial point cloud of a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Axis-aligned bounds of all points, `None` for an empty cloud.
    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.points.first()?.position;
        let (min, max) = self
            .points
            .iter()
            .fold((first, first), |(min, max), p| {
                (min.min(p.position), max.max(p.position))
            });
        Some(Bounds::new(min, max))
    }
}

/// Axis-aligned box used to clip a spatial part. Both corners are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_arrays(min: [f32; 3], max: [f32; 3]) -> Self {
        Self::new(Vec3::from_array(min), Vec3::from_array(max))
    }

    /// Whether `point` lies inside the box, boundary included.
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}
