//! Zone shapes and the inner/outer factor model
//!
//! A zone pairs an inner and an outer shape of the same kind. The factor at
//! a point is 1 inside the inner shape, 0 outside the outer shape, and
//! interpolated by the shortest distance to the shells in between.
//! Environments and rooms are both built on zones.

use serde::{Deserialize, Serialize};

use crate::position::{Orientation, Position3D};

/// A primitive shape centered at the local origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { half_width: f32, half_depth: f32, half_height: f32 },
    /// Vertical segment of `half_height` with hemispherical caps of `radius`
    Capsule { radius: f32, half_height: f32 },
    /// Apex at the origin opening along local forward (+y)
    Cone { radius: f32, height: f32 },
}

impl Shape {
    /// Signed distance from the point to the shape surface, negative inside.
    pub fn signed_distance(&self, p: &Position3D) -> f32 {
        match *self {
            Shape::Sphere { radius } => p.magnitude() - radius,
            Shape::Box { half_width, half_depth, half_height } => {
                let dx = p.x.abs() - half_width;
                let dy = p.y.abs() - half_depth;
                let dz = p.z.abs() - half_height;
                let outside = Position3D::new(dx.max(0.0), dy.max(0.0), dz.max(0.0));
                let inside = dx.max(dy).max(dz).min(0.0);
                outside.magnitude() + inside
            }
            Shape::Capsule { radius, half_height } => {
                let core = (half_height - radius).max(0.0);
                let clamped_z = p.z.clamp(-core, core);
                Position3D::new(p.x, p.y, p.z - clamped_z).magnitude() - radius
            }
            Shape::Cone { radius, height } => {
                if height <= 0.0 {
                    return p.magnitude();
                }
                let along = p.y;
                let radial = (p.x * p.x + p.z * p.z).sqrt();
                let max_radial = radius * (along / height).clamp(0.0, 1.0);
                let d_axis = (-along).max(along - height);
                let d_radial = radial - max_radial;
                d_axis.max(d_radial)
            }
        }
    }

    /// Whether the point lies inside the shape
    pub fn contains(&self, p: &Position3D) -> bool {
        self.signed_distance(p) <= 0.0
    }

    /// Interior volume, used to order rooms by size
    pub fn volume(&self) -> f32 {
        match *self {
            Shape::Sphere { radius } => 4.0 / 3.0 * std::f32::consts::PI * radius.powi(3),
            Shape::Box { half_width, half_depth, half_height } => {
                8.0 * half_width * half_depth * half_height
            }
            Shape::Capsule { radius, half_height } => {
                let core = (2.0 * half_height - 2.0 * radius).max(0.0);
                std::f32::consts::PI * radius * radius * core
                    + 4.0 / 3.0 * std::f32::consts::PI * radius.powi(3)
            }
            Shape::Cone { radius, height } => std::f32::consts::PI * radius * radius * height / 3.0,
        }
    }
}

/// A positioned inner/outer shape pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub inner: Shape,
    pub outer: Shape,
    pub position: Position3D,
    pub orientation: Orientation,
}

impl Zone {
    pub fn new(inner: Shape, outer: Shape) -> Self {
        Self { inner, outer, position: Position3D::origin(), orientation: Orientation::identity() }
    }

    pub fn at(mut self, position: Position3D) -> Self {
        self.position = position;
        self
    }

    fn to_local(&self, world: &Position3D) -> Position3D {
        self.orientation.world_to_local(&world.sub(&self.position))
    }

    /// Factor in [0, 1] at the given world-space point.
    pub fn factor(&self, world: &Position3D) -> f32 {
        let local = self.to_local(world);
        let outer_distance = self.outer.signed_distance(&local);
        if outer_distance >= 0.0 {
            return 0.0;
        }
        let inner_distance = self.inner.signed_distance(&local);
        if inner_distance <= 0.0 {
            return 1.0;
        }

        // Between the shells: interpolate by shortest distance to each
        let gap = inner_distance - outer_distance;
        if gap <= 0.0 { 1.0 } else { (-outer_distance / gap).clamp(0.0, 1.0) }
    }

    /// Whether the point is inside the outer shell
    pub fn contains(&self, world: &Position3D) -> bool {
        self.outer.contains(&self.to_local(world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere_zone(inner: f32, outer: f32) -> Zone {
        Zone::new(Shape::Sphere { radius: inner }, Shape::Sphere { radius: outer })
    }

    #[test]
    fn test_sphere_factor_regions() {
        let zone = sphere_zone(1.0, 3.0);
        assert_eq!(zone.factor(&Position3D::new(0.5, 0.0, 0.0)), 1.0);
        assert_eq!(zone.factor(&Position3D::new(4.0, 0.0, 0.0)), 0.0);

        let mid = zone.factor(&Position3D::new(2.0, 0.0, 0.0));
        assert!((mid - 0.5).abs() < 1e-5, "mid {mid}");
    }

    #[test]
    fn test_zone_translation() {
        let zone = sphere_zone(1.0, 2.0).at(Position3D::new(10.0, 0.0, 0.0));
        assert_eq!(zone.factor(&Position3D::new(10.0, 0.0, 0.0)), 1.0);
        assert_eq!(zone.factor(&Position3D::origin()), 0.0);
    }

    #[test]
    fn test_box_distance() {
        let b = Shape::Box { half_width: 1.0, half_depth: 2.0, half_height: 1.0 };
        assert!(b.contains(&Position3D::new(0.5, 1.5, 0.0)));
        assert!(!b.contains(&Position3D::new(1.5, 0.0, 0.0)));
        assert!((b.signed_distance(&Position3D::new(2.0, 0.0, 0.0)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_capsule_contains_caps() {
        let c = Shape::Capsule { radius: 1.0, half_height: 3.0 };
        assert!(c.contains(&Position3D::new(0.0, 0.0, 2.5)));
        assert!(!c.contains(&Position3D::new(0.0, 0.0, 4.5)));
    }

    #[test]
    fn test_cone_contains() {
        let c = Shape::Cone { radius: 1.0, height: 2.0 };
        assert!(c.contains(&Position3D::new(0.0, 1.9, 0.0)));
        assert!(c.contains(&Position3D::new(0.4, 1.0, 0.0)));
        assert!(!c.contains(&Position3D::new(0.9, 1.0, 0.0)));
        assert!(!c.contains(&Position3D::new(0.0, -0.1, 0.0)));
    }

    #[test]
    fn test_volume_ordering() {
        let small = Shape::Sphere { radius: 1.0 };
        let large = Shape::Box { half_width: 5.0, half_depth: 5.0, half_height: 5.0 };
        assert!(large.volume() > small.volume());
    }
}
