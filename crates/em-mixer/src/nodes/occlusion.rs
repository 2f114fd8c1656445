//! Occlusion and obstruction filtering
//!
//! Both nodes share one implementation: a gain and a low-pass cutoff
//! looked up on configured per-engine curves, driven by the layer's atomic
//! occlusion/obstruction factor. Occlusion models a fully blocked path,
//! obstruction a partially blocked one; they differ only in which factor
//! and curve set they read.

use em_core::AudioBuffer;
use em_dsp::{Biquad, BiquadCoeffs};

use crate::nodes::{FactorCurve, NodeContext};

const FILTER_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Cutoff used when the low-pass curve reaches zero
const MIN_CUTOFF_HZ: f32 = 250.0;

/// Cutoff above which filtering is bypassed entirely
const OPEN_CUTOFF_HZ: f32 = 20_000.0;

/// Gain and low-pass curves for one factor kind
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OcclusionCurves {
    pub gain: FactorCurve,
    pub lpf: FactorCurve,
}

impl Default for OcclusionCurves {
    fn default() -> Self {
        Self { gain: FactorCurve::linear(1.0, 0.2), lpf: FactorCurve::linear(1.0, 0.05) }
    }
}

/// Per-layer filter state
#[derive(Debug, Default)]
pub struct OcclusionState {
    filters: Vec<Biquad>,
    cutoff: f32,
}

impl OcclusionState {
    pub fn new(channels: usize) -> Self {
        Self { filters: vec![Biquad::default(); channels], cutoff: 0.0 }
    }
}

/// Apply the factor's gain and low-pass to the buffer in place.
pub fn process_occlusion(
    ctx: &NodeContext,
    curves: &OcclusionCurves,
    state: &mut OcclusionState,
    factor: f32,
    buffer: &mut AudioBuffer,
    channels: usize,
) {
    let factor = factor.clamp(0.0, 1.0);
    if factor <= 0.0 {
        return;
    }

    let gain = curves.gain.evaluate(factor);
    let cutoff = (OPEN_CUTOFF_HZ * curves.lpf.evaluate(factor)).max(MIN_CUTOFF_HZ);

    let filtering = cutoff < OPEN_CUTOFF_HZ * 0.95;
    if filtering {
        if (cutoff - state.cutoff).abs() > 1.0 {
            let coeffs = BiquadCoeffs::lowpass(cutoff, FILTER_Q, ctx.sample_rate as f32);
            for filter in &mut state.filters {
                filter.set_coeffs(coeffs);
            }
            state.cutoff = cutoff;
        }
        for ch in 0..channels.min(state.filters.len()) {
            state.filters[ch].process_block(&mut buffer.channel_mut(ch)[..ctx.frames]);
        }
    }

    if (gain - 1.0).abs() > f32::EPSILON {
        for ch in 0..channels {
            em_dsp::apply_gain(&mut buffer.channel_mut(ch)[..ctx.frames], gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::SpatialParams;

    fn context(spatial: &SpatialParams, frames: usize) -> NodeContext<'_> {
        NodeContext { frames, sample_rate: 48000, spatial, obstruction: 0.0, occlusion: 0.0 }
    }

    #[test]
    fn test_zero_factor_is_passthrough() {
        let spatial = SpatialParams::default();
        let ctx = context(&spatial, 8);
        let curves = OcclusionCurves::default();
        let mut state = OcclusionState::new(1);

        let mut buffer = AudioBuffer::new(8, 1);
        buffer.channel_mut(0).fill(0.5);
        process_occlusion(&ctx, &curves, &mut state, 0.0, &mut buffer, 1);
        assert_eq!(buffer.channel(0)[0], 0.5);
    }

    #[test]
    fn test_full_factor_attenuates() {
        let spatial = SpatialParams::default();
        let ctx = context(&spatial, 64);
        let curves = OcclusionCurves::default();
        let mut state = OcclusionState::new(1);

        let mut buffer = AudioBuffer::new(64, 1);
        buffer.channel_mut(0).fill(1.0);
        process_occlusion(&ctx, &curves, &mut state, 1.0, &mut buffer, 1);

        // Gain curve bottoms out at 0.2; the low-pass settles below that
        let tail = buffer.channel(0)[63];
        assert!(tail < 0.25, "tail {tail}");
    }
}
