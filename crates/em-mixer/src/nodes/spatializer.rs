//! Panning and ambisonic nodes
//!
//! Stereo panning covers `Position` spatialization without HRTF; the
//! ambisonic trio (panner → rotator → binaural decoder) covers full HRTF
//! rendering. The panner encodes in world space relative to the listener
//! position; the rotator then applies the inverse listener orientation so
//! the field is head-relative before decoding.

use em_core::AudioBuffer;
use em_dsp::constant_power_gains;
use em_spatial::{AmbisonicEncoder, AmbisonicOrder, AmbisonicRotator, BinauralDecoder, BinauralState};

use crate::nodes::NodeContext;
use crate::sound::Spatialization;

/// Per-layer ambisonic encoder state (cached harmonics per direction)
pub struct PannerState {
    pub encoder: AmbisonicEncoder,
}

impl Default for PannerState {
    fn default() -> Self {
        Self { encoder: AmbisonicEncoder::new(AmbisonicOrder::First) }
    }
}

/// Downmix the input to mono into `mono`, or borrow channel 0 directly.
fn fold_to_mono(input: &AudioBuffer, channels: usize, frames: usize, mono: &mut [f32]) {
    if channels >= 2 {
        let left = input.channel(0);
        let right = input.channel(1);
        for i in 0..frames {
            mono[i] = (left[i] + right[i]) * 0.5;
        }
    } else {
        mono[..frames].copy_from_slice(&input.channel(0)[..frames]);
    }
}

/// Stereo panning by source position. Returns the output channel count.
pub fn process_stereo_panner(
    ctx: &NodeContext,
    input: &AudioBuffer,
    output: &mut AudioBuffer,
    channels: usize,
) -> usize {
    let pan = if ctx.spatial.spatialization == Spatialization::None {
        0.0
    } else {
        // Pan follows the source's left/right offset in listener space
        let local = ctx
            .spatial
            .listener_orientation
            .world_to_local(&ctx.source_direction().normalize());
        local.x.clamp(-1.0, 1.0)
    };

    let (left_gain, right_gain) = constant_power_gains(1.0, pan + ctx.spatial.pan);

    if channels >= 2 {
        for i in 0..ctx.frames {
            output.channel_mut(0)[i] = input.channel(0)[i] * left_gain * std::f32::consts::SQRT_2;
        }
        for i in 0..ctx.frames {
            output.channel_mut(1)[i] = input.channel(1)[i] * right_gain * std::f32::consts::SQRT_2;
        }
    } else {
        let src = input.channel(0);
        for i in 0..ctx.frames {
            output.channel_mut(0)[i] = src[i] * left_gain;
        }
        let src = input.channel(0);
        for i in 0..ctx.frames {
            output.channel_mut(1)[i] = src[i] * right_gain;
        }
    }

    2
}

/// Encode the source into first-order ambisonics. Returns 4.
pub fn process_ambisonic_panner(
    ctx: &NodeContext,
    state: &mut PannerState,
    input: &AudioBuffer,
    output: &mut AudioBuffer,
    channels: usize,
    mono_scratch: &mut [f32],
) -> usize {
    fold_to_mono(input, channels, ctx.frames, mono_scratch);
    let direction = ctx.source_direction();
    state.encoder.encode(&mono_scratch[..ctx.frames], &direction, output, ctx.frames);
    4
}

/// Rotate the soundfield into head-relative space. Returns 4.
pub fn process_ambisonic_rotator(ctx: &NodeContext, buffer: &mut AudioBuffer) -> usize {
    let mut rotator = AmbisonicRotator::new();
    rotator.set_rotation(ctx.spatial.listener_orientation.quaternion().inverse());
    rotator.process(buffer, ctx.frames);
    4
}

/// Decode the soundfield to binaural stereo. Returns 2.
///
/// Falls back to a plain stereo pan when no HRIR sphere is configured.
pub fn process_binaural_decoder(
    ctx: &NodeContext,
    decoder: Option<&BinauralDecoder>,
    state: &mut BinauralState,
    input: &AudioBuffer,
    output: &mut AudioBuffer,
    channels: usize,
) -> usize {
    match decoder {
        Some(decoder) if channels >= 4 => {
            let frames = ctx.frames;
            let (left, right) = split_stereo(output, frames);
            decoder.process(state, input, left, right, frames);
            2
        }
        _ => process_stereo_panner(ctx, input, output, channels.min(2)),
    }
}

/// Borrow the first two channels of a buffer mutably at once
fn split_stereo(buffer: &mut AudioBuffer, frames: usize) -> (&mut [f32], &mut [f32]) {
    debug_assert!(buffer.channels() >= 2);
    let stride = buffer.frames();
    let data = buffer.raw_mut();
    let (head, tail) = data.split_at_mut(stride);
    (&mut head[..frames], &mut tail[..frames])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::SpatialParams;
    use em_spatial::Position3D;

    fn context(spatial: &SpatialParams, frames: usize) -> NodeContext<'_> {
        NodeContext { frames, sample_rate: 48000, spatial, obstruction: 0.0, occlusion: 0.0 }
    }

    fn mono_input(frames: usize, value: f32) -> AudioBuffer {
        let mut input = AudioBuffer::new(frames, 4);
        input.channel_mut(0).fill(value);
        input
    }

    #[test]
    fn test_center_source_pans_equally() {
        let spatial = SpatialParams {
            location: Position3D::new(0.0, 1.0, 0.0),
            spatialization: Spatialization::Position,
            ..Default::default()
        };
        let ctx = context(&spatial, 8);
        let input = mono_input(8, 1.0);
        let mut output = AudioBuffer::new(8, 4);

        assert_eq!(process_stereo_panner(&ctx, &input, &mut output, 1), 2);
        assert!((output.channel(0)[0] - output.channel(1)[0]).abs() < 1e-6);
    }

    #[test]
    fn test_right_source_pans_right() {
        let spatial = SpatialParams {
            location: Position3D::new(1.0, 0.0, 0.0),
            spatialization: Spatialization::Position,
            ..Default::default()
        };
        let ctx = context(&spatial, 8);
        let input = mono_input(8, 1.0);
        let mut output = AudioBuffer::new(8, 4);

        process_stereo_panner(&ctx, &input, &mut output, 1);
        assert!(output.channel(1)[0] > 0.99);
        assert!(output.channel(0)[0].abs() < 1e-4);
    }

    #[test]
    fn test_ambisonic_panner_encodes_direction() {
        let spatial = SpatialParams {
            location: Position3D::new(0.0, 2.0, 0.0),
            spatialization: Spatialization::Hrtf,
            ..Default::default()
        };
        let ctx = context(&spatial, 8);
        let input = mono_input(8, 1.0);
        let mut output = AudioBuffer::new(8, 4);
        let mut scratch = vec![0.0; 8];
        let mut state = PannerState::default();

        let width =
            process_ambisonic_panner(&ctx, &mut state, &input, &mut output, 1, &mut scratch);
        assert_eq!(width, 4);
        // Front source: W and X carry the signal
        assert!((output.channel(0)[0] - 1.0).abs() < 1e-4);
        assert!((output.channel(3)[0] - 1.0).abs() < 1e-4);
    }
}
