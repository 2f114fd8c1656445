//! Parameter smoothing helpers for the audio thread
//!
//! The mixer smooths play-speed changes once per block to avoid zipper
//! noise on abrupt pitch/RTPC jumps; faders and duck gains use the
//! one-pole smoother.

/// Per-block pitch smoothing factor.
///
/// Each mix block moves the current speed 75% of the way to the target.
/// Long pitch ramps therefore converge geometrically; tune with care as
/// lower values audibly lag the target.
pub const PITCH_SMOOTH_FACTOR: f32 = 0.75;

/// Minimum effective play speed, guards the converter ratio against zero
pub const MIN_PLAY_SPEED: f32 = 0.001;

/// Linear interpolation
#[inline]
pub fn lerp(a: f32, t: f32, b: f32) -> f32 {
    a + t * (b - a)
}

/// Advance a smoothed play speed one block toward its target
#[inline]
pub fn smooth_play_speed(current: f32, target: f32) -> f32 {
    lerp(current, PITCH_SMOOTH_FACTOR, target).max(MIN_PLAY_SPEED)
}

/// One-pole smoother (RC filter style) for control-rate values
#[derive(Debug, Clone)]
pub struct OnePole {
    current: f32,
    coeff: f32,
}

impl OnePole {
    /// Create with a time constant in seconds at the given update rate in Hz
    pub fn new(initial: f32, time_seconds: f32, update_rate: f32) -> Self {
        Self { current: initial, coeff: Self::coeff(time_seconds, update_rate) }
    }

    fn coeff(time_seconds: f32, update_rate: f32) -> f32 {
        if time_seconds <= 0.0 {
            1.0
        } else {
            // Reach ~63% of the target within the time constant
            1.0 - (-1.0 / (time_seconds * update_rate)).exp()
        }
    }

    pub fn set_time(&mut self, time_seconds: f32, update_rate: f32) {
        self.coeff = Self::coeff(time_seconds, update_rate);
    }

    pub fn snap_to(&mut self, value: f32) {
        self.current = value;
    }

    #[inline]
    pub fn advance(&mut self, target: f32) -> f32 {
        self.current += self.coeff * (target - self.current);
        self.current
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_play_speed_converges() {
        let mut speed = 1.0;
        for _ in 0..32 {
            speed = smooth_play_speed(speed, 2.0);
        }
        assert!((speed - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_smooth_play_speed_floor() {
        let speed = smooth_play_speed(0.001, 0.0);
        assert!(speed >= MIN_PLAY_SPEED);
    }

    #[test]
    fn test_one_pole_reaches_target() {
        let mut smoother = OnePole::new(0.0, 0.1, 60.0);
        let mut value = 0.0;
        for _ in 0..120 {
            value = smoother.advance(1.0);
        }
        assert!(value > 0.99);
    }

    #[test]
    fn test_one_pole_instant_with_zero_time() {
        let mut smoother = OnePole::new(0.0, 0.0, 60.0);
        assert_eq!(smoother.advance(1.0), 1.0);
    }
}
