//! Conversion between controller steps and physical units.
//!
//! Each axis has a fixed linear scale with no offset. Forward conversion
//! rounds to the nearest whole step; the inverse is exact.

use super::axis::{Axis, PhysicalPosition, StepPosition};

/// X travel per step (mm).
pub const X_MM_PER_STEP: f64 = 0.01113;
/// Y travel per step (mm).
pub const Y_MM_PER_STEP: f64 = 0.009382;
/// Z travel per step (mm).
pub const Z_MM_PER_STEP: f64 = 0.009355;
/// Theta rotation per step (degrees).
pub const THETA_DEG_PER_STEP: f64 = 0.0226;
/// Phi rotation per step (degrees).
pub const PHI_DEG_PER_STEP: f64 = 0.02259;

impl Axis {
    /// Physical units (mm or degrees) per controller step.
    pub fn units_per_step(self) -> f64 {
        match self {
            Axis::X => X_MM_PER_STEP,
            Axis::Y => Y_MM_PER_STEP,
            Axis::Z => Z_MM_PER_STEP,
            Axis::Theta => THETA_DEG_PER_STEP,
            Axis::Phi => PHI_DEG_PER_STEP,
        }
    }

    /// Convert a physical value to the nearest whole step (ties away from zero).
    pub fn to_steps(self, value: f64) -> i64 {
        (value / self.units_per_step()).round() as i64
    }

    /// Convert a step count to physical units.
    pub fn to_physical(self, steps: i64) -> f64 {
        steps as f64 * self.units_per_step()
    }
}

/// Convert a physical position (mm / degrees) to controller steps.
pub fn to_steps(position: PhysicalPosition) -> StepPosition {
    position.map(|axis, value| axis.to_steps(value))
}

/// Convert controller steps to a physical position (mm / degrees).
pub fn to_physical(steps: StepPosition) -> PhysicalPosition {
    steps.map(|axis, value| axis.to_physical(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_round_trip_within_half_step() {
        let samples = [0.0, 1.0, -1.0, 12.345, 100.0, -250.75, 0.004, 359.9];
        for axis in Axis::all() {
            for &value in &samples {
                let back = axis.to_physical(axis.to_steps(value));
                assert_abs_diff_eq!(back, value, epsilon = axis.units_per_step() / 2.0 + 1e-12);
            }
        }
    }

    #[test]
    fn test_known_conversions() {
        // 100 mm on x is 8984.7 steps
        assert_eq!(Axis::X.to_steps(100.0), 8985);
        assert_eq!(Axis::Theta.to_steps(90.0), 3982);
        assert_eq!(Axis::Phi.to_steps(-45.0), -1992);
        assert_abs_diff_eq!(Axis::Y.to_physical(1000), 9.382, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_does_not_round() {
        assert_abs_diff_eq!(Axis::Z.to_physical(1), 0.009355, epsilon = 1e-15);
        assert_abs_diff_eq!(Axis::Z.to_physical(-3), -0.028065, epsilon = 1e-15);
    }

    #[test]
    fn test_position_conversion_is_per_axis() {
        let physical = PhysicalPosition::new(11.13, 9.382, 9.355, 22.6, 22.59);
        let steps = to_steps(physical);
        assert_eq!(steps, StepPosition::splat(1000));

        let back = to_physical(steps);
        assert_abs_diff_eq!(back.x, 11.13, epsilon = 1e-9);
        assert_abs_diff_eq!(back.phi, 22.59, epsilon = 1e-9);
    }

    #[test]
    fn test_minus_one_mm_is_a_real_target() {
        assert_eq!(Axis::X.to_steps(-1.0), -90);
    }
}
