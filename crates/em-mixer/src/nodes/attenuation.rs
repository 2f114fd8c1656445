//! Distance attenuation with air absorption EQ
//!
//! The node evaluates the source's attenuation curve against the current
//! listener distance. Band gains of the three-band air absorption EQ are
//! normalized so their maximum is 1 and the extracted overall gain scales
//! the output. A double-buffered filter set crossfades old and new gains
//! over one block, so moving sources never click.

use em_core::{AudioBuffer, Sample};
use em_dsp::{Biquad, BiquadCoeffs};
use em_spatial::AIR_ABSORPTION_BAND_COUNT;

use crate::nodes::NodeContext;
use crate::sound::Spatialization;

/// Band gains below this are treated as silence and short-circuit the layer
pub const ATTENUATION_EPSILON: f32 = 1e-4;

const LOW_SHELF_FREQ: f32 = 250.0;
const PEAKING_FREQ: f32 = 1500.0;
const HIGH_SHELF_FREQ: f32 = 8000.0;
const FILTER_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// One low/peak/high filter chain per channel
#[derive(Debug, Clone, Default)]
struct EqSet {
    gains_db: [f32; AIR_ABSORPTION_BAND_COUNT],
    filters: Vec<[Biquad; AIR_ABSORPTION_BAND_COUNT]>,
}

impl EqSet {
    fn new(channels: usize) -> Self {
        Self {
            gains_db: [0.0; AIR_ABSORPTION_BAND_COUNT],
            filters: vec![Default::default(); channels],
        }
    }

    fn set_gains(&mut self, gains_db: [f32; AIR_ABSORPTION_BAND_COUNT], sample_rate: f32) {
        self.gains_db = gains_db;
        for chain in &mut self.filters {
            chain[0].set_coeffs(BiquadCoeffs::low_shelf(LOW_SHELF_FREQ, FILTER_Q, gains_db[0], sample_rate));
            chain[1].set_coeffs(BiquadCoeffs::peaking(PEAKING_FREQ, FILTER_Q, gains_db[1], sample_rate));
            chain[2].set_coeffs(BiquadCoeffs::high_shelf(HIGH_SHELF_FREQ, FILTER_Q, gains_db[2], sample_rate));
        }
    }

    fn process(&mut self, channel: usize, samples: &mut [Sample]) {
        if let Some(chain) = self.filters.get_mut(channel) {
            for filter in chain.iter_mut() {
                filter.process_block(samples);
            }
        }
    }
}

/// Per-layer attenuation state
pub struct AttenuationState {
    sets: [EqSet; 2],
    current: usize,
    crossfade_pending: bool,
    scratch: Vec<Sample>,
}

impl Default for AttenuationState {
    fn default() -> Self {
        Self::new(2, 0)
    }
}

impl AttenuationState {
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            sets: [EqSet::new(channels), EqSet::new(channels)],
            current: 0,
            crossfade_pending: false,
            scratch: vec![0.0; max_frames],
        }
    }

    fn update_gains(&mut self, gains_db: [f32; AIR_ABSORPTION_BAND_COUNT], sample_rate: f32) {
        let old = self.sets[self.current].gains_db;
        let changed = old
            .iter()
            .zip(gains_db.iter())
            .any(|(a, b)| (a - b).abs() > 0.01);

        if changed {
            let next = 1 - self.current;
            self.sets[next].set_gains(gains_db, sample_rate);
            self.current = next;
            self.crossfade_pending = true;
        }
    }
}

/// Normalize band gains so their maximum is 1, returning the extracted
/// overall gain.
pub fn normalize_band_gains(gains: &mut [f32; AIR_ABSORPTION_BAND_COUNT]) -> f32 {
    let overall = gains.iter().fold(0.0f32, |a, &b| a.max(b));
    if overall > 0.0 {
        for g in gains.iter_mut() {
            *g /= overall;
        }
    }
    overall
}

/// Process one block. Returns `false` when the target gain is below the
/// epsilon and the output is silence.
pub fn process_attenuation(
    ctx: &NodeContext,
    state: &mut AttenuationState,
    input: &AudioBuffer,
    output: &mut AudioBuffer,
    channels: usize,
) -> bool {
    if ctx.spatial.spatialization == Spatialization::None {
        output.copy_from(0, input, 0, ctx.frames);
        return true;
    }

    let distance = ctx.distance();
    let attenuation = &ctx.spatial.attenuation;
    let mut target_gain = attenuation.gain(distance);

    let mut band_gains = attenuation.air_absorption_gains(distance);
    target_gain *= normalize_band_gains(&mut band_gains);

    if target_gain <= ATTENUATION_EPSILON {
        return false;
    }

    output.copy_from(0, input, 0, ctx.frames);

    if attenuation.air_absorption {
        let gains_db = band_gains.map(|g| 20.0 * g.max(1e-6).log10());
        state.update_gains(gains_db, ctx.sample_rate as f32);

        if state.crossfade_pending {
            // Old set renders into scratch, new set in place, then a
            // one-block linear crossfade between them
            let previous = 1 - state.current;
            for ch in 0..channels {
                let frames = ctx.frames.min(state.scratch.len());
                state.scratch[..frames].copy_from_slice(&output.channel(ch)[..frames]);

                let (a, b) = state.sets.split_at_mut(1);
                let (old_set, new_set) =
                    if previous == 0 { (&mut a[0], &mut b[0]) } else { (&mut b[0], &mut a[0]) };

                old_set.process(ch, &mut state.scratch[..frames]);
                new_set.process(ch, &mut output.channel_mut(ch)[..frames]);

                let out = output.channel_mut(ch);
                for i in 0..frames {
                    let t = i as f32 / frames.max(1) as f32;
                    out[i] = state.scratch[i] + t * (out[i] - state.scratch[i]);
                }
            }
            state.crossfade_pending = false;
        } else {
            for ch in 0..channels {
                let current = state.current;
                state.sets[current].process(ch, &mut output.channel_mut(ch)[..ctx.frames]);
            }
        }
    }

    for ch in 0..channels {
        em_dsp::apply_gain(&mut output.channel_mut(ch)[..ctx.frames], target_gain);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::SpatialParams;
    use em_spatial::{Attenuation, Position3D};

    fn context(spatial: &SpatialParams, frames: usize) -> NodeContext<'_> {
        NodeContext { frames, sample_rate: 48000, spatial, obstruction: 0.0, occlusion: 0.0 }
    }

    fn spatial_at(distance: f32) -> SpatialParams {
        SpatialParams {
            location: Position3D::new(0.0, distance, 0.0),
            spatialization: Spatialization::Position,
            attenuation: Attenuation { min_distance: 1.0, max_distance: 10.0, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_band_gains() {
        let mut gains = [0.5, 0.25, 0.125];
        let overall = normalize_band_gains(&mut gains);
        assert!((overall - 0.5).abs() < 1e-6);
        assert!((gains[0] - 1.0).abs() < 1e-6);
        assert!((gains[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_short_circuit_beyond_max_distance() {
        let spatial = spatial_at(50.0);
        let ctx = context(&spatial, 16);
        let mut state = AttenuationState::new(1, 16);

        let input = AudioBuffer::new(16, 2);
        let mut output = AudioBuffer::new(16, 2);
        assert!(!process_attenuation(&ctx, &mut state, &input, &mut output, 1));
    }

    #[test]
    fn test_gain_applied_at_half_distance() {
        let spatial = spatial_at(5.5);
        let ctx = context(&spatial, 8);
        let mut state = AttenuationState::new(1, 8);

        let mut input = AudioBuffer::new(8, 2);
        input.channel_mut(0).fill(1.0);
        let mut output = AudioBuffer::new(8, 2);

        assert!(process_attenuation(&ctx, &mut state, &input, &mut output, 1));
        assert!((output.channel(0)[4] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_non_spatialized_passthrough() {
        let mut spatial = spatial_at(50.0);
        spatial.spatialization = Spatialization::None;
        let ctx = context(&spatial, 8);
        let mut state = AttenuationState::new(1, 8);

        let mut input = AudioBuffer::new(8, 2);
        input.channel_mut(0).fill(0.25);
        let mut output = AudioBuffer::new(8, 2);

        assert!(process_attenuation(&ctx, &mut state, &input, &mut output, 1));
        assert_eq!(output.channel(0)[0], 0.25);
    }
}
