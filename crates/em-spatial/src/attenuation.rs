//! Distance attenuation curves and air absorption

use serde::{Deserialize, Serialize};

/// Number of air absorption EQ bands
pub const AIR_ABSORPTION_BAND_COUNT: usize = 3;

/// Default per-band air absorption coefficients (low, mid, high), per meter
const DEFAULT_ABSORPTION: [f32; AIR_ABSORPTION_BAND_COUNT] = [0.0002, 0.0017, 0.0182];

/// A point on a custom attenuation curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub distance: f32,
    pub gain: f32,
}

/// Gain falloff model over distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum AttenuationModel {
    /// Full gain everywhere
    None,
    /// Linear ramp from min to max distance
    #[default]
    Linear,
    /// Inverse-distance falloff
    Inverse,
    /// Exponential falloff with the given rolloff factor
    Exponential { rolloff: f32 },
    /// Piecewise-linear over sorted control points
    Custom { points: Vec<CurvePoint> },
}

/// Distance attenuation settings for a sound source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attenuation {
    pub min_distance: f32,
    pub max_distance: f32,
    pub model: AttenuationModel,
    /// Enable the three-band air absorption EQ
    pub air_absorption: bool,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self { min_distance: 1.0, max_distance: 100.0, model: AttenuationModel::default(), air_absorption: false }
    }
}

impl Attenuation {
    /// Gain in [0, 1] at the given distance.
    pub fn gain(&self, distance: f32) -> f32 {
        if distance <= self.min_distance {
            return 1.0;
        }
        if distance >= self.max_distance {
            return 0.0;
        }

        let range = self.max_distance - self.min_distance;
        let t = (distance - self.min_distance) / range;

        match &self.model {
            AttenuationModel::None => 1.0,
            AttenuationModel::Linear => 1.0 - t,
            AttenuationModel::Inverse => self.min_distance / distance,
            AttenuationModel::Exponential { rolloff } => (-rolloff * t).exp(),
            AttenuationModel::Custom { points } => {
                if points.is_empty() {
                    return 1.0 - t;
                }
                let mut previous = CurvePoint { distance: self.min_distance, gain: 1.0 };
                for point in points {
                    if distance <= point.distance {
                        let span = point.distance - previous.distance;
                        if span <= 0.0 {
                            return point.gain;
                        }
                        let s = (distance - previous.distance) / span;
                        return previous.gain + s * (point.gain - previous.gain);
                    }
                    previous = *point;
                }
                previous.gain
            }
        }
    }

    /// Per-band air absorption gains (low, mid, high) at the given distance.
    pub fn air_absorption_gains(&self, distance: f32) -> [f32; AIR_ABSORPTION_BAND_COUNT] {
        if !self.air_absorption {
            return [1.0; AIR_ABSORPTION_BAND_COUNT];
        }
        let travelled = (distance - self.min_distance).max(0.0);
        let mut gains = [1.0; AIR_ABSORPTION_BAND_COUNT];
        for (gain, coeff) in gains.iter_mut().zip(DEFAULT_ABSORPTION.iter()) {
            *gain = (-coeff * travelled).exp();
        }
        gains
    }
}
