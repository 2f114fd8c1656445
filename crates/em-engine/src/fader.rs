//! Fade scheduling
//!
//! A fader moves a gain along a time-scaled curve. Channels use them for
//! fade-in/out transitions; buses use them for timed gain changes.
//! Starting a new fade replaces the previous one, which is how in-flight
//! fades are cancelled.

use serde::{Deserialize, Serialize};

/// Fade curve shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    #[default]
    Linear,
    Exponential,
    SCurve,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl FadeCurve {
    /// Map linear progress `t` in [0, 1] onto the curve
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t * t,
            FadeCurve::SCurve => t * t * (3.0 - 2.0 * t),
            FadeCurve::EaseIn => t * t,
            FadeCurve::EaseOut => t * (2.0 - t),
            FadeCurve::EaseInOut => {
                if t < 0.5 { 2.0 * t * t } else { 1.0 - (-2.0 * t + 2.0).powi(2) / 2.0 }
            }
        }
    }
}

/// A time-parameterized gain transition
#[derive(Debug, Clone)]
pub struct Fader {
    from: f32,
    to: f32,
    duration: f32,
    elapsed: f32,
    curve: FadeCurve,
    active: bool,
}

impl Default for Fader {
    fn default() -> Self {
        Self { from: 1.0, to: 1.0, duration: 0.0, elapsed: 0.0, curve: FadeCurve::Linear, active: false }
    }
}

impl Fader {
    /// Begin a fade from the current value. A zero duration completes
    /// immediately.
    pub fn start(&mut self, to: f32, duration: f32, curve: FadeCurve) {
        self.from = self.current();
        self.to = to;
        self.duration = duration.max(0.0);
        self.elapsed = 0.0;
        self.curve = curve;
        self.active = duration > 0.0;
        if !self.active {
            self.from = to;
        }
    }

    /// Snap to a value, cancelling any fade in flight
    pub fn set(&mut self, value: f32) {
        self.from = value;
        self.to = value;
        self.active = false;
        self.elapsed = 0.0;
        self.duration = 0.0;
    }

    /// Advance by `delta` seconds and return the current value
    pub fn update(&mut self, delta: f32) -> f32 {
        if self.active {
            self.elapsed += delta;
            if self.elapsed >= self.duration {
                self.active = false;
                self.from = self.to;
            }
        }
        self.current()
    }

    pub fn current(&self) -> f32 {
        if !self.active {
            return self.to;
        }
        let t = if self.duration > 0.0 { self.elapsed / self.duration } else { 1.0 };
        self.from + (self.to - self.from) * self.curve.apply(t)
    }

    pub fn finished(&self) -> bool {
        !self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_is_instant() {
        let mut fader = Fader::default();
        fader.start(0.0, 0.0, FadeCurve::Linear);
        assert!(fader.finished());
        assert_eq!(fader.current(), 0.0);
    }

    #[test]
    fn test_linear_midpoint() {
        let mut fader = Fader::default();
        fader.set(0.0);
        fader.start(1.0, 1.0, FadeCurve::Linear);
        let value = fader.update(0.5);
        assert!((value - 0.5).abs() < 1e-6);
        assert!(!fader.finished());

        fader.update(0.6);
        assert!(fader.finished());
        assert_eq!(fader.current(), 1.0);
    }

    #[test]
    fn test_replacing_fade_restarts_from_current() {
        let mut fader = Fader::default();
        fader.set(1.0);
        fader.start(0.0, 1.0, FadeCurve::Linear);
        fader.update(0.5);

        // New fade cancels the old one and starts at ~0.5
        fader.start(1.0, 1.0, FadeCurve::Linear);
        let value = fader.current();
        assert!((value - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_curves_hit_endpoints() {
        for curve in [
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::SCurve,
            FadeCurve::EaseIn,
            FadeCurve::EaseOut,
            FadeCurve::EaseInOut,
        ] {
            assert!((curve.apply(0.0)).abs() < 1e-6, "{curve:?}");
            assert!((curve.apply(1.0) - 1.0).abs() < 1e-6, "{curve:?}");
        }
    }
}
