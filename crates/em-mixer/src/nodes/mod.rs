//! Pipeline node implementations
//!
//! Nodes are shared across layers; anything stateful (filter histories,
//! convolution tails, reverb lines) lives in a per-layer [`NodeState`]
//! owned by the layer and dropped when the layer returns to `Min`.

mod attenuation;
mod occlusion;
mod reverb;
mod spatializer;

pub use attenuation::*;
pub use occlusion::*;
pub use reverb::*;
pub use spatializer::*;

use em_spatial::BinauralState;

use crate::layer::SpatialParams;

/// Per-layer state for one pipeline node
#[derive(Default)]
pub enum NodeState {
    #[default]
    None,
    Attenuation(AttenuationState),
    Occlusion(OcclusionState),
    AmbisonicPanner(PannerState),
    Binaural(BinauralState),
    Reverb(ReverbState),
}

/// Read-only context handed to every node during one layer's execution
pub struct NodeContext<'a> {
    pub frames: usize,
    pub sample_rate: u32,
    pub spatial: &'a SpatialParams,
    pub obstruction: f32,
    pub occlusion: f32,
}

impl NodeContext<'_> {
    /// Distance from the source to the listener
    pub fn distance(&self) -> f32 {
        self.spatial.location.distance_to(&self.spatial.listener_position)
    }

    /// World-space direction from the listener to the source
    pub fn source_direction(&self) -> em_spatial::Position3D {
        self.spatial.location.sub(&self.spatial.listener_position)
    }
}

/// Piecewise-linear curve mapping a factor in [0, 1] to a coefficient
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FactorCurve {
    /// (factor, value) pairs sorted by factor
    pub points: Vec<(f32, f32)>,
}

impl FactorCurve {
    pub fn linear(from: f32, to: f32) -> Self {
        Self { points: vec![(0.0, from), (1.0, to)] }
    }

    pub fn evaluate(&self, factor: f32) -> f32 {
        let factor = factor.clamp(0.0, 1.0);
        let Some(first) = self.points.first() else { return 1.0 };
        if factor <= first.0 {
            return first.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if factor <= x1 {
                let span = x1 - x0;
                if span <= 0.0 {
                    return y1;
                }
                return y0 + (factor - x0) / span * (y1 - y0);
            }
        }
        self.points.last().map(|p| p.1).unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_curve_interpolates() {
        let curve = FactorCurve::linear(1.0, 0.2);
        assert!((curve.evaluate(0.0) - 1.0).abs() < 1e-6);
        assert!((curve.evaluate(0.5) - 0.6).abs() < 1e-6);
        assert!((curve.evaluate(1.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_factor_curve_clamps() {
        let curve = FactorCurve::linear(1.0, 0.0);
        assert_eq!(curve.evaluate(-2.0), 1.0);
        assert_eq!(curve.evaluate(3.0), 0.0);
    }
}
