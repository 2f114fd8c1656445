//! em-dsp: DSP primitives for the Echomix real-time path
//!
//! Everything here is allocation-free once constructed:
//! - Biquad filters (TDF-II) for air absorption EQ and occlusion low-pass
//! - One-pole smoothing and the mixer's pitch smoother
//! - Dynamic-ratio sample-rate conversion
//! - Constant-power pan law
//! - SIMD mix-add kernels with a bit-exact scalar fallback

mod biquad;
mod pan;
mod resampler;
mod simd;
mod smoothing;

pub use biquad::*;
pub use pan::*;
pub use resampler::*;
pub use simd::*;
pub use smoothing::*;
