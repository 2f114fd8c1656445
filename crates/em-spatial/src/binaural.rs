//! Binaural decoding of first-order ambisonics
//!
//! The soundfield is decoded to a fixed set of virtual speakers; each
//! speaker feed is convolved with the HRIR pair sampled from the sphere in
//! the speaker's direction. Convolution runs in the frequency domain with
//! overlap-add, so HRIRs are transformed once at construction.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::hrir::HrirSphere;
use crate::position::Position3D;
use em_core::AudioBuffer;

/// Cube-corner virtual speaker layout
const SPEAKER_DIRECTIONS: [(f32, f32, f32); 8] = [
    (1.0, 1.0, 1.0),
    (1.0, 1.0, -1.0),
    (1.0, -1.0, 1.0),
    (1.0, -1.0, -1.0),
    (-1.0, 1.0, 1.0),
    (-1.0, 1.0, -1.0),
    (-1.0, -1.0, 1.0),
    (-1.0, -1.0, -1.0),
];

struct VirtualSpeaker {
    direction: Position3D,
    left_freq: Vec<Complex32>,
    right_freq: Vec<Complex32>,
}

/// Shared decoder configuration: speaker HRTFs and FFT plans.
///
/// Per-layer convolution tails live in [`BinauralState`], so one decoder
/// serves every active layer.
pub struct BinauralDecoder {
    speakers: Vec<VirtualSpeaker>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    fft_size: usize,
    block_len: usize,
    ir_length: usize,
}

/// Per-layer decode scratch: overlap-add tails (one pair per virtual
/// speaker), the speaker feed, and the FFT work buffer. Everything is
/// sized at creation so the decode path never allocates.
#[derive(Debug, Default)]
pub struct BinauralState {
    tails: Vec<[Vec<f32>; 2]>,
    feed: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl BinauralDecoder {
    pub fn new(sphere: &HrirSphere) -> Self {
        let ir_length = sphere.ir_length();
        let fft_size = (ir_length * 4).next_power_of_two();
        let block_len = fft_size - ir_length + 1;

        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        let speakers = SPEAKER_DIRECTIONS
            .iter()
            .map(|&(x, y, z)| {
                let direction = Position3D::new(x, y, z).normalize();
                let hrir = sphere.sample(&direction);

                let transform = |ir: &[f32]| -> Vec<Complex32> {
                    let mut buf: Vec<Complex32> = ir
                        .iter()
                        .map(|&s| Complex32::new(s, 0.0))
                        .chain(std::iter::repeat(Complex32::new(0.0, 0.0)))
                        .take(fft_size)
                        .collect();
                    fft_forward.process(&mut buf);
                    buf
                };

                VirtualSpeaker {
                    direction,
                    left_freq: transform(&hrir.left),
                    right_freq: transform(&hrir.right),
                }
            })
            .collect();

        Self { speakers, fft_forward, fft_inverse, fft_size, block_len, ir_length }
    }

    pub fn ir_length(&self) -> usize {
        self.ir_length
    }

    /// Create per-layer convolution state able to decode blocks of up to
    /// `max_frames` frames without allocating.
    pub fn make_state(&self, max_frames: usize) -> BinauralState {
        BinauralState {
            tails: (0..self.speakers.len())
                .map(|_| [vec![0.0; self.fft_size], vec![0.0; self.fft_size]])
                .collect(),
            feed: vec![0.0; max_frames],
            scratch: vec![Complex32::new(0.0, 0.0); self.fft_size],
        }
    }

    /// Decode a first-order ambisonic buffer into stereo.
    ///
    /// `input` must hold at least 4 channels; `left`/`right` receive the
    /// decoded signal (overwritten, not accumulated). Blocks larger than
    /// the state's capacity are truncated.
    pub fn process(
        &self,
        state: &mut BinauralState,
        input: &AudioBuffer,
        left: &mut [f32],
        right: &mut [f32],
        frames: usize,
    ) {
        if input.channels() < 4 || state.tails.len() != self.speakers.len() {
            return;
        }
        let frames = frames.min(state.feed.len());

        left[..frames].fill(0.0);
        right[..frames].fill(0.0);

        let norm = 1.0 / self.speakers.len() as f32;
        let BinauralState { tails, feed, scratch } = state;

        for (speaker, tail_pair) in self.speakers.iter().zip(tails.iter_mut()) {
            // Max-rE style first-order decode toward this speaker
            let d = speaker.direction;
            let w = input.channel(0);
            let cy = input.channel(1);
            let cz = input.channel(2);
            let cx = input.channel(3);
            for i in 0..frames {
                feed[i] = 0.5 * (w[i] + d.x * cy[i] + d.z * cz[i] + d.y * cx[i]) * norm;
            }

            self.convolve(&feed[..frames], &speaker.left_freq, &mut tail_pair[0], left, scratch);
            self.convolve(&feed[..frames], &speaker.right_freq, &mut tail_pair[1], right, scratch);
        }
    }

    /// Overlap-add convolution of `input` with the prepared spectrum,
    /// accumulating into `output`.
    fn convolve(
        &self,
        input: &[f32],
        spectrum: &[Complex32],
        tail: &mut [f32],
        output: &mut [f32],
        scratch: &mut [Complex32],
    ) {
        let mut position = 0;
        while position < input.len() {
            let chunk = (input.len() - position).min(self.block_len);

            for (i, slot) in scratch.iter_mut().enumerate() {
                let sample = if i < chunk { input[position + i] } else { 0.0 };
                *slot = Complex32::new(sample, 0.0);
            }

            self.fft_forward.process(scratch);
            for (slot, h) in scratch.iter_mut().zip(spectrum.iter()) {
                *slot *= h;
            }
            self.fft_inverse.process(scratch);

            let scale = 1.0 / self.fft_size as f32;
            for i in 0..chunk {
                output[position + i] += scratch[i].re * scale + tail[i];
            }

            // Slide the tail and fold in the new block's overhang
            for i in 0..self.fft_size {
                let carried = if i + chunk < self.fft_size { tail[i + chunk] } else { 0.0 };
                let fresh = if i + chunk < self.fft_size {
                    scratch[i + chunk].re * scale
                } else {
                    0.0
                };
                tail[i] = carried + fresh;
            }

            position += chunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_produces_stereo() {
        let sphere = HrirSphere::synthetic(48000);
        let decoder = BinauralDecoder::new(&sphere);
        let mut state = decoder.make_state(64);

        // Encode an impulse from the front
        let mut field = AudioBuffer::new(64, 4);
        field.channel_mut(0)[0] = 1.0;
        field.channel_mut(3)[0] = 1.0;

        let mut left = vec![0.0; 64];
        let mut right = vec![0.0; 64];
        decoder.process(&mut state, &field, &mut left, &mut right, 64);

        let energy: f32 = left.iter().chain(right.iter()).map(|x| x * x).sum();
        assert!(energy > 0.0);
    }

    #[test]
    fn test_left_source_favors_left_ear() {
        let sphere = HrirSphere::synthetic(48000);
        let decoder = BinauralDecoder::new(&sphere);
        let mut state = decoder.make_state(256);

        // Steady signal fully panned left: Y dipole negative... left is -x
        let mut field = AudioBuffer::new(256, 4);
        for i in 0..256 {
            field.channel_mut(0)[i] = 1.0;
            field.channel_mut(1)[i] = -1.0; // Y = direction.x = -1
        }

        let mut left = vec![0.0; 256];
        let mut right = vec![0.0; 256];
        decoder.process(&mut state, &field, &mut left, &mut right, 256);

        let left_energy: f32 = left.iter().map(|x| x * x).sum();
        let right_energy: f32 = right.iter().map(|x| x * x).sum();
        assert!(left_energy > right_energy, "{left_energy} <= {right_energy}");
    }

    #[test]
    fn test_tail_carries_across_calls() {
        let sphere = HrirSphere::synthetic(48000);
        let decoder = BinauralDecoder::new(&sphere);
        let mut state = decoder.make_state(8);

        // Impulse in the first call, then silence: the IR tail must appear
        // in the second call's output.
        let mut field = AudioBuffer::new(8, 4);
        field.channel_mut(0)[0] = 1.0;
        field.channel_mut(3)[0] = 1.0;

        let mut left = vec![0.0; 8];
        let mut right = vec![0.0; 8];
        decoder.process(&mut state, &field, &mut left, &mut right, 8);

        let silent = AudioBuffer::new(8, 4);
        decoder.process(&mut state, &silent, &mut left, &mut right, 8);
        let tail_energy: f32 = left.iter().chain(right.iter()).map(|x| x * x).sum();
        assert!(tail_energy > 0.0);
    }
}
