//! Constant-power pan law
//!
//! The formula is explained in the following paper:
//! http://www.rs-met.com/documents/tutorials/PanRules.pdf

use std::f32::consts::PI;

/// Convert an overall gain and a pan in [-1, 1] to left/right gains.
///
/// For any gain g and pan p, `L² + R² == g²`.
#[inline]
pub fn constant_power_gains(gain: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let p = PI * (pan + 1.0) / 4.0;
    (p.cos() * gain, p.sin() * gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_center_pan() {
        let (l, r) = constant_power_gains(1.0, 0.0);
        assert_abs_diff_eq!(l, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(r, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
    }

    #[test]
    fn test_hard_pans() {
        let (l, r) = constant_power_gains(1.0, -1.0);
        assert!((l - 1.0).abs() < 1e-6);
        assert!(r.abs() < 1e-6);

        let (l, r) = constant_power_gains(1.0, 1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_power_preserved() {
        for pan in [-1.0, -0.5, -0.1, 0.0, 0.3, 0.8, 1.0] {
            let (l, r) = constant_power_gains(0.8, pan);
            assert_abs_diff_eq!(l * l + r * r, 0.64, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pan_clamped() {
        assert_eq!(constant_power_gains(1.0, 5.0), constant_power_gains(1.0, 1.0));
        assert_eq!(constant_power_gains(1.0, -5.0), constant_power_gains(1.0, -1.0));
    }
}
