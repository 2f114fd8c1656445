//! SIMD mixing kernels
//!
//! The mixer advances cursors in blocks of [`SIMD_BLOCK_FRAMES`]; layer
//! start/end bounds are truncated to this alignment. The `simd` feature
//! selects `wide::f32x4` kernels; the scalar path is bit-identical across
//! platforms, the SIMD path is identical within rounding.

use em_core::Sample;

#[cfg(feature = "simd")]
use wide::f32x4;

/// Frames processed per mix step; cursor alignment unit
pub const SIMD_BLOCK_FRAMES: usize = 4;

/// Align a frame count up to the next SIMD block boundary
#[inline]
pub const fn align_frames(frames: usize) -> usize {
    (frames + SIMD_BLOCK_FRAMES - 1) & !(SIMD_BLOCK_FRAMES - 1)
}

/// Truncate a frame position down to a SIMD block boundary
#[inline]
pub const fn truncate_frames(frames: u64) -> u64 {
    frames & !(SIMD_BLOCK_FRAMES as u64 - 1)
}

/// Multiply-accumulate one block: `out[i..i+4] += in[i..i+4] * gain`
#[inline]
pub fn mix_add_block(index: usize, gain: f32, input: &[Sample], output: &mut [Sample]) {
    #[cfg(feature = "simd")]
    {
        let x = f32x4::from([input[index], input[index + 1], input[index + 2], input[index + 3]]);
        let y = f32x4::from([output[index], output[index + 1], output[index + 2], output[index + 3]]);
        let mixed = x.mul_add(f32x4::splat(gain), y);
        output[index..index + SIMD_BLOCK_FRAMES].copy_from_slice(&mixed.to_array());
    }

    #[cfg(not(feature = "simd"))]
    {
        for i in index..index + SIMD_BLOCK_FRAMES {
            output[i] += input[i] * gain;
        }
    }
}

/// Clamp every sample in the slice to [-1, 1]
pub fn clip(samples: &mut [Sample]) {
    #[cfg(feature = "simd")]
    {
        let (chunks, rest) = samples.split_at_mut(samples.len() & !(SIMD_BLOCK_FRAMES - 1));
        for chunk in chunks.chunks_exact_mut(SIMD_BLOCK_FRAMES) {
            let v = f32x4::from([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let clamped = v.fast_max(f32x4::splat(-1.0)).fast_min(f32x4::splat(1.0));
            chunk.copy_from_slice(&clamped.to_array());
        }
        for s in rest {
            *s = s.clamp(-1.0, 1.0);
        }
    }

    #[cfg(not(feature = "simd"))]
    {
        for s in samples {
            *s = s.clamp(-1.0, 1.0);
        }
    }
}

/// Scale every sample in the slice by `gain`
pub fn apply_gain(samples: &mut [Sample], gain: f32) {
    #[cfg(feature = "simd")]
    {
        let (chunks, rest) = samples.split_at_mut(samples.len() & !(SIMD_BLOCK_FRAMES - 1));
        let g = f32x4::splat(gain);
        for chunk in chunks.chunks_exact_mut(SIMD_BLOCK_FRAMES) {
            let v = f32x4::from([chunk[0], chunk[1], chunk[2], chunk[3]]) * g;
            chunk.copy_from_slice(&v.to_array());
        }
        for s in rest {
            *s *= gain;
        }
    }

    #[cfg(not(feature = "simd"))]
    {
        for s in samples {
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_frames() {
        assert_eq!(align_frames(0), 0);
        assert_eq!(align_frames(1), 4);
        assert_eq!(align_frames(4), 4);
        assert_eq!(align_frames(5), 8);
    }

    #[test]
    fn test_truncate_frames() {
        assert_eq!(truncate_frames(0), 0);
        assert_eq!(truncate_frames(3), 0);
        assert_eq!(truncate_frames(7), 4);
    }

    #[test]
    fn test_mix_add_block() {
        let input = [1.0, 2.0, 3.0, 4.0];
        let mut output = [0.5; 4];
        mix_add_block(0, 2.0, &input, &mut output);
        assert_eq!(output, [2.5, 4.5, 6.5, 8.5]);
    }

    #[test]
    fn test_clip() {
        let mut samples = [0.5, -3.0, 3.0, -0.2, 1.5];
        clip(&mut samples);
        assert_eq!(samples, [0.5, -1.0, 1.0, -0.2, 1.0]);
    }

    #[test]
    fn test_apply_gain() {
        let mut samples = [1.0, -1.0, 0.5, 2.0, 3.0];
        apply_gain(&mut samples, 0.5);
        assert_eq!(samples, [0.5, -0.5, 0.25, 1.0, 1.5]);
    }
}
