//! 3D position and orientation types
//!
//! Positions wrap `nalgebra::Vector3` so every spatial module shares one
//! linear-algebra backbone; only the thin engine-facing surface lives
//! here. Axes: x = right, y = front, z = up.

use std::ops::Deref;

use nalgebra::{Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// World-space position or direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Position3D(Vector3<f32>);

impl Position3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vector3::new(x, y, z))
    }

    pub fn origin() -> Self {
        Self(Vector3::zeros())
    }

    /// Direction at `azimuth`/`elevation` degrees, scaled to `distance`.
    ///
    /// Azimuth 0 faces +y and grows to the right; elevation raises +z.
    pub fn from_spherical(azimuth: f32, elevation: f32, distance: f32) -> Self {
        let (sin_az, cos_az) = azimuth.to_radians().sin_cos();
        let (sin_el, cos_el) = elevation.to_radians().sin_cos();
        Self::new(distance * sin_az * cos_el, distance * cos_az * cos_el, distance * sin_el)
    }

    /// Convert to spherical coordinates; the origin maps to all zeros.
    pub fn to_spherical(&self) -> SphericalCoord {
        let distance = self.0.norm();
        if distance <= f32::EPSILON {
            return SphericalCoord::new(0.0, 0.0, 0.0);
        }

        SphericalCoord {
            azimuth: self.0.x.atan2(self.0.y).to_degrees(),
            elevation: (self.0.z / distance).asin().to_degrees(),
            distance,
        }
    }

    pub fn magnitude(&self) -> f32 {
        self.0.norm()
    }

    /// Unit vector, falling back to forward for a near-zero input
    pub fn normalize(&self) -> Self {
        if self.0.norm_squared() <= f32::EPSILON {
            return Self::new(0.0, 1.0, 0.0);
        }
        Self(self.0.normalize())
    }

    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        Self(self.0.lerp(&other.0, t))
    }

    pub fn distance_to(&self, other: &Self) -> f32 {
        (self.0 - other.0).norm()
    }

    pub fn dot(&self, other: &Self) -> f32 {
        self.0.dot(&other.0)
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self(self.0.cross(&other.0))
    }

    pub fn add(&self, other: &Self) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self(self.0 - other.0)
    }

    pub fn scale(&self, factor: f32) -> Self {
        Self(self.0 * factor)
    }

    /// The wrapped nalgebra vector
    pub fn vector(&self) -> Vector3<f32> {
        self.0
    }
}

impl Deref for Position3D {
    type Target = Vector3<f32>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vector3<f32>> for Position3D {
    fn from(v: Vector3<f32>) -> Self {
        Self(v)
    }
}

impl From<[f32; 3]> for Position3D {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Position3D> for [f32; 3] {
    fn from(p: Position3D) -> Self {
        [p.0.x, p.0.y, p.0.z]
    }
}

impl Default for Position3D {
    fn default() -> Self {
        Self::origin()
    }
}

/// Spherical coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphericalCoord {
    /// Azimuth in degrees (-180 to 180)
    pub azimuth: f32,
    /// Elevation in degrees (-90 to 90)
    pub elevation: f32,
    /// Distance from origin
    pub distance: f32,
}

impl SphericalCoord {
    pub fn new(azimuth: f32, elevation: f32, distance: f32) -> Self {
        Self { azimuth, elevation, distance }
    }

    pub fn to_cartesian(&self) -> Position3D {
        Position3D::from_spherical(self.azimuth, self.elevation, self.distance)
    }
}

/// Orientation expressed as forward and up vectors.
///
/// The engine configuration supplies orientations as vector pairs, so this
/// is the native representation; the right vector and the listener-space
/// basis derive from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub forward: Position3D,
    pub up: Position3D,
}

impl Orientation {
    pub fn new(forward: Position3D, up: Position3D) -> Self {
        Self { forward: forward.normalize(), up: up.normalize() }
    }

    /// Forward-facing orientation (+Y forward, +Z up)
    pub fn identity() -> Self {
        Self { forward: Position3D::new(0.0, 1.0, 0.0), up: Position3D::new(0.0, 0.0, 1.0) }
    }

    pub fn right(&self) -> Position3D {
        self.forward.cross(&self.up).normalize()
    }

    /// Transform a world-space direction into this orientation's local space.
    ///
    /// Local axes: x = right, y = forward, z = up.
    pub fn world_to_local(&self, direction: &Position3D) -> Position3D {
        Position3D::new(
            direction.dot(&self.right()),
            direction.dot(&self.forward),
            direction.dot(&self.up),
        )
    }

    /// Rotation quaternion mapping the identity orientation onto this one
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        let rotation = Rotation3::from_basis_unchecked(&[
            self.right().vector(),
            self.forward.vector(),
            self.up.vector(),
        ]);
        UnitQuaternion::from_rotation_matrix(&rotation)
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}
