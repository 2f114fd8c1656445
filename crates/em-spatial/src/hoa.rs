//! Ambisonic processing
//!
//! First- and second-order encoding (ACN ordering, SN3D normalization),
//! soundfield rotation by the listener orientation, and the spherical
//! harmonic helpers the binaural decoder builds on.

use nalgebra::{UnitQuaternion, Vector3};

use crate::error::{SpatialError, SpatialResult};
use crate::position::Position3D;
use em_core::AudioBuffer;

/// Ambisonic order (determines spatial resolution)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbisonicOrder {
    /// First order (4 channels) - basic 3D
    First = 1,
    /// Second order (9 channels) - better localization
    Second = 2,
}

impl AmbisonicOrder {
    /// Get channel count for this order
    pub fn channel_count(&self) -> usize {
        let n = *self as usize;
        (n + 1) * (n + 1)
    }

    pub fn from_order(order: usize) -> SpatialResult<Self> {
        match order {
            1 => Ok(AmbisonicOrder::First),
            2 => Ok(AmbisonicOrder::Second),
            _ => Err(SpatialError::InvalidAmbisonicOrder(order)),
        }
    }
}

/// Spherical harmonic coefficients for one direction
#[derive(Debug, Clone)]
pub struct SphericalHarmonics {
    coeffs: Vec<f32>,
    order: AmbisonicOrder,
}

impl SphericalHarmonics {
    pub fn new(order: AmbisonicOrder) -> Self {
        Self { coeffs: vec![0.0; order.channel_count()], order }
    }

    pub fn from_direction(azimuth: f32, elevation: f32, order: AmbisonicOrder) -> Self {
        let mut sh = Self::new(order);
        sh.compute_for_direction(azimuth, elevation);
        sh
    }

    /// Compute coefficients for a direction (degrees), ACN/SN3D
    pub fn compute_for_direction(&mut self, azimuth: f32, elevation: f32) {
        let az = azimuth.to_radians();
        let el = elevation.to_radians();

        let cos_el = el.cos();
        let sin_el = el.sin();

        // Order 0 (omnidirectional)
        self.coeffs[0] = 1.0;

        // Order 1 (figure-8 patterns)
        self.coeffs[1] = cos_el * az.sin(); // Y
        self.coeffs[2] = sin_el; // Z
        self.coeffs[3] = cos_el * az.cos(); // X

        if self.order as usize >= 2 {
            let cos2_az = (2.0 * az).cos();
            let sin2_az = (2.0 * az).sin();
            let cos2_el = cos_el * cos_el;

            self.coeffs[4] = 0.866025 * cos2_el * sin2_az; // V
            self.coeffs[5] = 0.866025 * (2.0 * el).sin() * az.sin(); // T
            self.coeffs[6] = 0.5 * (3.0 * sin_el * sin_el - 1.0); // R
            self.coeffs[7] = 0.866025 * (2.0 * el).sin() * az.cos(); // S
            self.coeffs[8] = 0.866025 * cos2_el * cos2_az; // U
        }
    }

    /// Get channel by ACN index
    #[inline]
    pub fn get(&self, acn: usize) -> f32 {
        self.coeffs.get(acn).copied().unwrap_or(0.0)
    }

    pub fn order(&self) -> AmbisonicOrder {
        self.order
    }
}

/// Ambisonic encoder for point sources
pub struct AmbisonicEncoder {
    order: AmbisonicOrder,
    cached_sh: SphericalHarmonics,
    last_direction: Option<Position3D>,
}

impl AmbisonicEncoder {
    pub fn new(order: AmbisonicOrder) -> Self {
        Self { order, cached_sh: SphericalHarmonics::new(order), last_direction: None }
    }

    pub fn channel_count(&self) -> usize {
        self.order.channel_count()
    }

    /// Encode a mono signal arriving from `direction` into the planar
    /// ambisonic buffer. The direction need not be normalized.
    pub fn encode(&mut self, mono: &[f32], direction: &Position3D, output: &mut AudioBuffer, frames: usize) {
        self.update_direction(direction);

        for ch in 0..self.channel_count().min(output.channels()) {
            let coeff = self.cached_sh.get(ch);
            let dst = output.channel_mut(ch);
            for i in 0..frames.min(mono.len()) {
                dst[i] = mono[i] * coeff;
            }
        }
    }

    fn update_direction(&mut self, direction: &Position3D) {
        let needs_update = match &self.last_direction {
            None => true,
            Some(last) => {
                (last.x - direction.x).abs() > 1e-6
                    || (last.y - direction.y).abs() > 1e-6
                    || (last.z - direction.z).abs() > 1e-6
            }
        };

        if needs_update {
            let spherical = direction.to_spherical();
            self.cached_sh.compute_for_direction(spherical.azimuth, spherical.elevation);
            self.last_direction = Some(*direction);
        }
    }
}

/// Rotates a first-order ambisonic soundfield by a quaternion.
///
/// W is rotation invariant; the three dipole channels rotate as the
/// direction vector they represent.
pub struct AmbisonicRotator {
    rotation: UnitQuaternion<f32>,
}

impl AmbisonicRotator {
    pub fn new() -> Self {
        Self { rotation: UnitQuaternion::identity() }
    }

    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.rotation = rotation;
    }

    /// Rotate the soundfield in place. Expects at least 4 channels.
    pub fn process(&self, buffer: &mut AudioBuffer, frames: usize) {
        if buffer.channels() < 4 {
            return;
        }

        for i in 0..frames.min(buffer.frames()) {
            // ACN 1..3 carry (Y=x, Z=z, X=y) dipoles in our axes
            let v = Vector3::new(buffer.channel(1)[i], buffer.channel(3)[i], buffer.channel(2)[i]);
            let rotated = self.rotation * v;
            buffer.channel_mut(1)[i] = rotated.x;
            buffer.channel_mut(3)[i] = rotated.y;
            buffer.channel_mut(2)[i] = rotated.z;
        }
    }
}

impl Default for AmbisonicRotator {
    fn default() -> Self {
        Self::new()
    }
}

/// ACN channel index from (order, degree)
pub fn acn_index(order: i32, degree: i32) -> usize {
    (order * order + order + degree) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count() {
        assert_eq!(AmbisonicOrder::First.channel_count(), 4);
        assert_eq!(AmbisonicOrder::Second.channel_count(), 9);
    }

    #[test]
    fn test_order_validation() {
        assert!(AmbisonicOrder::from_order(1).is_ok());
        assert!(AmbisonicOrder::from_order(5).is_err());
    }

    #[test]
    fn test_acn_index() {
        assert_eq!(acn_index(0, 0), 0); // W
        assert_eq!(acn_index(1, -1), 1); // Y
        assert_eq!(acn_index(1, 0), 2); // Z
        assert_eq!(acn_index(1, 1), 3); // X
    }

    #[test]
    fn test_spherical_harmonics_front() {
        let sh = SphericalHarmonics::from_direction(0.0, 0.0, AmbisonicOrder::First);

        assert!((sh.get(0) - 1.0).abs() < 0.001); // W
        assert!(sh.get(1).abs() < 0.001); // Y (no left/right)
        assert!(sh.get(2).abs() < 0.001); // Z (no up/down)
        assert!((sh.get(3) - 1.0).abs() < 0.001); // X (front)
    }

    #[test]
    fn test_encode_left() {
        let mut encoder = AmbisonicEncoder::new(AmbisonicOrder::First);
        let mono = vec![1.0f32; 16];
        let mut out = AudioBuffer::new(16, 4);

        encoder.encode(&mono, &Position3D::from_spherical(-90.0, 0.0, 1.0), &mut out, 16);

        // Y negative for a source on the left, X near zero
        assert!(out.channel(1)[0] < -0.9);
        assert!(out.channel(3)[0].abs() < 0.01);
    }

    #[test]
    fn test_rotation_moves_front_to_side() {
        let mut encoder = AmbisonicEncoder::new(AmbisonicOrder::First);
        let mono = vec![1.0f32; 4];
        let mut field = AudioBuffer::new(4, 4);
        encoder.encode(&mono, &Position3D::from_spherical(0.0, 0.0, 1.0), &mut field, 4);

        // Rotate the field 90° around up; the X dipole moves into Y
        let mut rotator = AmbisonicRotator::new();
        rotator.set_rotation(UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            std::f32::consts::FRAC_PI_2,
        ));
        rotator.process(&mut field, 4);

        assert!(field.channel(3)[0].abs() < 1e-5);
        assert!(field.channel(1)[0].abs() > 0.99);
    }
}
