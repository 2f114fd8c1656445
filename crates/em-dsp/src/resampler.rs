//! Per-layer sample-rate converter
//!
//! Adapts a source's native rate to the device rate with a dynamic ratio
//! (base rate ratio × smoothed play speed). Ratio updates keep the
//! in-flight interpolation state, so pitch changes never click.

use em_core::AudioBuffer;

/// Maximum channels a converter instance supports
const MAX_CHANNELS: usize = 2;

/// Linear-interpolation sample-rate converter with persistent phase.
#[derive(Debug, Clone)]
pub struct Resampler {
    /// Input frames consumed per output frame produced
    ratio: f64,
    /// Fractional read position between the history frame and input frame 0
    phase: f64,
    /// Last consumed input frame, one sample per channel
    history: [f32; MAX_CHANNELS],
    channels: usize,
}

impl Resampler {
    /// Create a converter for the given channel count.
    ///
    /// Returns `None` when either rate is zero or the channel count is
    /// unsupported.
    pub fn new(channels: usize, source_rate: u32, target_rate: u32) -> Option<Self> {
        if source_rate == 0 || target_rate == 0 || channels == 0 || channels > MAX_CHANNELS {
            return None;
        }
        Some(Self {
            ratio: source_rate as f64 / target_rate as f64,
            phase: 0.0,
            history: [0.0; MAX_CHANNELS],
            channels,
        })
    }

    /// Update the conversion ratio without flushing filter state.
    pub fn set_ratio(&mut self, ratio: f64) {
        if ratio > 0.0 {
            self.ratio = ratio;
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Input frames needed to produce `output_frames` at the current ratio.
    pub fn required_input_frames(&self, output_frames: usize) -> usize {
        (self.phase + output_frames as f64 * self.ratio).ceil() as usize
    }

    /// Frames of input history retained between calls.
    pub fn input_latency(&self) -> usize {
        1
    }

    /// Drop the interpolation history, e.g. when a loop rewinds the cursor.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.history = [0.0; MAX_CHANNELS];
    }

    /// Convert `input_frames` from `input` into `output_frames` in `output`.
    ///
    /// Returns the number of input frames consumed. `input` must hold at
    /// least `required_input_frames(output_frames)` frames.
    pub fn process(
        &mut self,
        input: &AudioBuffer,
        input_frames: usize,
        output: &mut AudioBuffer,
        output_frames: usize,
    ) -> usize {
        if output_frames == 0 {
            return 0;
        }

        for ch in 0..self.channels.min(input.channels()) {
            let src = input.channel(ch);
            let dst = output.channel_mut(ch);
            let history = self.history[ch];

            for (n, out) in dst.iter_mut().take(output_frames).enumerate() {
                let pos = self.phase + n as f64 * self.ratio;
                let index = pos as usize;
                let frac = (pos - index as f64) as f32;

                let x0 = if index == 0 { history } else { src[(index - 1).min(input_frames - 1)] };
                let x1 = src[index.min(input_frames - 1)];
                *out = x0 + frac * (x1 - x0);
            }
        }

        let advance = self.phase + output_frames as f64 * self.ratio;
        let consumed = (advance as usize).min(input_frames);
        self.phase = advance - consumed as f64;

        if consumed > 0 {
            for ch in 0..self.channels.min(input.channels()) {
                self.history[ch] = input.channel(ch)[consumed - 1];
            }
        }

        consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> AudioBuffer {
        let mut buf = AudioBuffer::new(frames, 1);
        for (i, s) in buf.channel_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }
        buf
    }

    #[test]
    fn test_unity_ratio_passthrough() {
        let mut converter = Resampler::new(1, 48000, 48000).unwrap();
        let input = ramp(8);
        let mut output = AudioBuffer::new(8, 1);

        let consumed = converter.process(&input, 8, &mut output, 8);
        assert_eq!(consumed, 8);
        // One frame of latency: output trails the ramp by one sample
        assert_eq!(output.channel(0)[0], 0.0);
        for i in 1..8 {
            assert!((output.channel(0)[i] - (i - 1) as f32).abs() < 1e-4);
        }
    }

    #[test]
    fn test_required_frames_scale_with_ratio() {
        let converter = Resampler::new(1, 96000, 48000).unwrap();
        assert_eq!(converter.required_input_frames(64), 128);

        let converter = Resampler::new(1, 24000, 48000).unwrap();
        assert_eq!(converter.required_input_frames(64), 32);
    }

    #[test]
    fn test_downsample_halves_consumption() {
        let mut converter = Resampler::new(1, 96000, 48000).unwrap();
        let input = ramp(128);
        let mut output = AudioBuffer::new(64, 1);

        let consumed = converter.process(&input, 128, &mut output, 64);
        assert_eq!(consumed, 128);
    }

    #[test]
    fn test_ratio_change_keeps_phase() {
        let mut converter = Resampler::new(1, 48000, 48000).unwrap();
        let input = ramp(16);
        let mut output = AudioBuffer::new(10, 1);
        converter.process(&input, 16, &mut output, 10);

        let history = converter.history[0];
        converter.set_ratio(1.5);
        // History frame survives the ratio update
        assert_eq!(converter.history[0], history);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(Resampler::new(1, 0, 48000).is_none());
        assert!(Resampler::new(1, 48000, 0).is_none());
        assert!(Resampler::new(3, 48000, 48000).is_none());
    }
}
